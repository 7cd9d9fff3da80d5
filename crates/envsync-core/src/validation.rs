//! # Validation Module
//!
//! Rules a StartSync request must satisfy before an operation record is
//! created.
//!
//! ## Validation Layers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Layer 1: Deserialization (serde)     shape of the request             │
//! │  Layer 2: THIS MODULE                 URLs, direction, names           │
//! │  Layer 3: Reachability (engine)       both agents answer Status        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use envsync_core::validation::{parse_direction, validate_name};
//! use envsync_core::Direction;
//!
//! assert_eq!(parse_direction("push").unwrap(), Direction::Push);
//! assert!(validate_name("extension", "../etc").is_err());
//! ```

use crate::error::ValidationError;
use crate::types::{ComponentKind, ComponentSelection, Direction, Environment};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

const MAX_NAME_LEN: usize = 200;

/// Parses a direction string (`push` or `pull`).
pub fn parse_direction(direction: &str) -> ValidationResult<Direction> {
    direction.parse()
}

/// Validates an opaque component identifier.
///
/// ## Rules
/// - Must not be empty
/// - At most 200 characters
/// - No path separators, `..` or NUL, and not made only of dots, so the
///   name addresses exactly one directory under the installation root
pub fn validate_name(field: &str, name: &str) -> ValidationResult<()> {
    if name.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if name.len() > MAX_NAME_LEN {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: format!("longer than {} characters", MAX_NAME_LEN),
        });
    }

    if name.contains('/') || name.contains('\\') || name.contains('\0') || name.contains("..") {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: format!("'{}' must not contain path separators or '..'", name),
        });
    }

    if name.chars().all(|c| c == '.') {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: format!("'{}' is not a component name", name),
        });
    }

    Ok(())
}

/// Validates the source/target pair.
///
/// Rejects the request when both base URLs are empty. A non-empty URL must
/// be http(s).
pub fn validate_environments(source: &Environment, target: &Environment) -> ValidationResult<()> {
    if source.base_url.trim().is_empty() && target.base_url.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "source.baseUrl / target.baseUrl".to_string(),
        });
    }

    for (field, env) in [("source.baseUrl", source), ("target.baseUrl", target)] {
        let url = env.base_url.trim();
        if !url.is_empty() && !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ValidationError::InvalidFormat {
                field: field.to_string(),
                reason: format!("'{}' must start with http:// or https://", url),
            });
        }
    }

    Ok(())
}

/// Validates a selection: non-empty and every name well formed.
pub fn validate_selection(selection: &ComponentSelection) -> ValidationResult<()> {
    if selection.is_empty() {
        return Err(ValidationError::EmptySelection);
    }

    for kind in [ComponentKind::Extension, ComponentKind::Theme, ComponentKind::Table] {
        for name in selection.names(kind) {
            validate_name(kind.as_str(), &name)?;
        }
    }

    Ok(())
}

/// Validates a complete StartSync request.
pub fn validate_request(
    source: &Environment,
    target: &Environment,
    selection: &ComponentSelection,
) -> ValidationResult<()> {
    validate_environments(source, target)?;
    validate_selection(selection)
}

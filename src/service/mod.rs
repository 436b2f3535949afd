//! Request-time services: the CRUD pipeline and the engines it drives.

pub mod audit;
pub mod crud;
pub mod diff;
pub mod validation;

pub use audit::{AuditAction, AuditLog, HistoryEntry, HISTORY_TABLE};
pub use crud::{CrudService, ListQuery};
pub use diff::{diff, diff_records, ChangeMap};
pub use validation::{FieldError, ValidationResult, Validator, ValidatorChain};

//! Canonical operation logging macros
//!
//! Every session operation brackets itself with a start event and exactly
//! one of an end or end-error event. Field names follow
//! `relmap_core_types::schema`.

/// Log the start of an operation
///
/// ```
/// # use relmap_core::log_op_start;
/// log_op_start!("commit");
/// log_op_start!("load", oid = "Person:42", depth = "single");
/// ```
#[macro_export]
macro_rules! log_op_start {
    ($op:expr $(, $($field:tt)*)?) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::__types::schema::EVENT_START,
            $($($field)*)?
        )
    };
}

/// Log the successful end of an operation
///
/// ```
/// # use relmap_core::log_op_end;
/// log_op_end!("commit", duration_ms = 42, inserted = 3);
/// ```
#[macro_export]
macro_rules! log_op_end {
    ($op:expr, duration_ms = $duration:expr $(, $($field:tt)*)?) => {
        tracing::info!(
            component = module_path!(),
            op = $op,
            event = $crate::__types::schema::EVENT_END,
            duration_ms = $duration,
            $($($field)*)?
        )
    };
}

/// Log a failed operation
///
/// Anything convertible into [`ExError`](crate::errors::ExError) is
/// accepted; its kind and stable code become `err.kind` and `err.code`.
///
/// ```
/// # use relmap_core::{log_op_error, errors::OrmError};
/// let err = OrmError::NotFound { oid: "Person:1".to_string() };
/// log_op_error!("load", err, duration_ms = 10);
/// ```
#[macro_export]
macro_rules! log_op_error {
    ($op:expr, $err:expr, duration_ms = $duration:expr $(, $($field:tt)*)?) => {{
        let ex_err: $crate::errors::ExError = $err.into();
        tracing::error!(
            component = module_path!(),
            op = $op,
            event = $crate::__types::schema::EVENT_END_ERROR,
            duration_ms = $duration,
            err.kind = ?ex_err.kind(),
            err.code = ex_err.code(),
            error = %ex_err,
            $($($field)*)?
        )
    }};
}

//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Structured lifecycle logging adapters."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
/// Shared expansion for the context-carrying log macros.
#[doc(hidden)]
#[macro_export]
macro_rules! __mstore_event {
    ($level:expr, context = $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        tracing::event!(
            $level,
            node = ctx.node.unwrap_or(""),
            service = ctx.service.unwrap_or(""),
            version = ctx.version.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
    ($level:expr, $($arg:tt)+) => {{
        $crate::__mstore_event!($level, context = $crate::LogContext::default(), $($arg)+)
    }};
}

/// Emit an informational log enriched with lifecycle context.
#[macro_export]
macro_rules! mstore_info {
    ($($arg:tt)+) => {
        $crate::__mstore_event!(tracing::Level::INFO, $($arg)+)
    };
}

/// Emit a warning enriched with lifecycle context.
#[macro_export]
macro_rules! mstore_warn {
    ($($arg:tt)+) => {
        $crate::__mstore_event!(tracing::Level::WARN, $($arg)+)
    };
}

/// Emit an error log enriched with lifecycle context.
#[macro_export]
macro_rules! mstore_error {
    ($($arg:tt)+) => {
        $crate::__mstore_event!(tracing::Level::ERROR, $($arg)+)
    };
}

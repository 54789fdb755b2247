// Logging macros shared by every crate in the workspace.
//
// All of them log under the `novagen` target so a single log4rs logger
// entry can tune the whole service.

#[macro_export]
macro_rules! sys_debug {
    ($($arg:tt)*) => {
        $crate::log::debug!(target: "novagen", $($arg)*)
    };
}

#[macro_export]
macro_rules! sys_info {
    ($($arg:tt)*) => {
        $crate::log::info!(target: "novagen", $($arg)*)
    };
}

#[macro_export]
macro_rules! sys_warn {
    ($($arg:tt)*) => {
        $crate::log::warn!(target: "novagen", $($arg)*)
    };
}

#[macro_export]
macro_rules! sys_error {
    ($($arg:tt)*) => {
        $crate::log::error!(target: "novagen", $($arg)*)
    };
}

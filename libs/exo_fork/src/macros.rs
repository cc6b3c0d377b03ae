/// Unrecoverable protocol violation: log the diagnostic, then abort the env.
///
/// The arguments are evaluated once; the log line and the panic message share
/// them.
macro_rules! fatal {
    ($($arg:tt)+) => {
        match format_args!($($arg)+) {
            args => {
                log::error!("{}", args);
                panic!("{}", args)
            }
        }
    };
}

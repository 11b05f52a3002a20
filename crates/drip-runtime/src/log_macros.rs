/// Domain-tagged logging macros.
///
/// Each macro injects a `domain` field so call sites stay short. Domains in
/// use: `sys` (lifecycle), `conf` (config and bootstrap), `eval` (walks and
/// store queries), `send` (gating, rendering, delivery).
///
/// ```ignore
/// drip_info!(sys, rules = 3, "campaign bootstrap complete");
/// drip_warn!(eval, rule = %name, error = %e, "walk failed");
/// ```
///
/// The domain is a bare identifier, not a string.

#[doc(hidden)]
macro_rules! drip_log {
    ($level:ident, $domain:ident, $($field:tt)*) => {
        tracing::$level!(domain = stringify!($domain), $($field)*)
    };
}

macro_rules! drip_error {
    ($domain:ident, $($rest:tt)*) => {
        drip_log!(error, $domain, $($rest)*)
    };
}

macro_rules! drip_warn {
    ($domain:ident, $($rest:tt)*) => {
        drip_log!(warn, $domain, $($rest)*)
    };
}

macro_rules! drip_info {
    ($domain:ident, $($rest:tt)*) => {
        drip_log!(info, $domain, $($rest)*)
    };
}

macro_rules! drip_debug {
    ($domain:ident, $($rest:tt)*) => {
        drip_log!(debug, $domain, $($rest)*)
    };
}

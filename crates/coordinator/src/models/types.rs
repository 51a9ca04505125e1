use std::borrow::Cow;

/// Provider identifier: borrowed for ids fixed in code, owned when read from
/// configuration.
pub type ProviderId = Cow<'static, str>;

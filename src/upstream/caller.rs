//! Call-site attribution for outbound calls.

use std::fmt;

/// Where an outbound call was issued from, rendered `path:line:function`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Caller(String);

impl Caller {
    /// Build from a source location. `function` may be a full type path
    /// (`crate::view::user::list::{{closure}}`); only the function name is kept.
    pub fn new(file: &str, line: u32, function: &str) -> Self {
        let file = file.strip_prefix("src/").unwrap_or(file);
        Self(format!("{}:{}:{}", file, line, short_function_name(function)))
    }

    pub fn unknown() -> Self {
        Self("unknown".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Caller {
    fn default() -> Self {
        Self::unknown()
    }
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn short_function_name(path: &str) -> &str {
    let mut path = path;
    while let Some(stripped) = path.strip_suffix("::{{closure}}") {
        path = stripped;
    }
    path.rsplit("::").next().unwrap_or(path)
}

/// Capture the current call site as a [`Caller`].
///
/// ```
/// fn list_users() -> latency_doctor::upstream::Caller {
///     latency_doctor::caller!()
/// }
/// assert!(list_users().as_str().ends_with(":list_users"));
/// ```
#[macro_export]
macro_rules! caller {
    () => {{
        fn __here() {}
        fn __type_name_of<T>(_: T) -> &'static str {
            ::std::any::type_name::<T>()
        }
        let name = __type_name_of(__here);
        $crate::upstream::Caller::new(
            file!(),
            line!(),
            name.strip_suffix("::__here").unwrap_or(name),
        )
    }};
}

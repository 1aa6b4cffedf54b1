use std::any::type_name;

pub fn pretty_type_name<'a, T>() -> &'a str {
    type_name::<T>().split("::").last().unwrap_or_default()
}

/// Builds the `namespace/name` key used both by the work queues and by the
/// allocation bookkeeping of a Fip.
pub fn resource_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// Splits a `namespace/name` key. Keys without exactly one separator are rejected.
pub fn split_resource_key(key: &str) -> Option<(&str, &str)> {
    let mut split = key.split('/');
    let namespace = split.next().filter(|s| !s.is_empty())?;
    let name = split.next().filter(|s| !s.is_empty())?;

    match split.next() {
        Some(_) => None,
        None => Some((namespace, name)),
    }
}

pub mod cues;
pub mod listen;
pub mod provision;
pub mod response;

use std::collections::BTreeSet;

/// Collect the repeated `name` query values into a de-duplicated set;
/// `?name=a&name=a` is the same request as `?name=a`.
pub(crate) fn names_from_query(query: Option<&str>) -> BTreeSet<String> {
    let Some(query) = query else {
        return BTreeSet::new();
    };
    form_urlencoded::parse(query.as_bytes())
        .filter(|(key, _)| key == "name")
        .map(|(_, value)| value.into_owned())
        .collect()
}

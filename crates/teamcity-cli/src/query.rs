//! Translation of validated options into TeamCity REST paths and locators.

use teamcity_api_models::ResourceKind;
use url::Url;

/// One REST request: path segments below the REST root, locator
/// dimensions, and additional query-string parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Query {
    kind: ResourceKind,
    segments: Vec<String>,
    filters: Vec<(String, String)>,
    params: Vec<(String, String)>,
}

impl Query {
    pub(crate) fn collection(kind: ResourceKind) -> Self {
        Self::at(kind, split_path(kind.collection_path()))
    }

    /// Single item, e.g. `builds/id:42`; the id stays one segment.
    pub(crate) fn item(kind: ResourceKind, id: &str) -> Self {
        let mut segments = split_path(kind.collection_path());
        segments.push(kind.item_locator(id));
        Self::at(kind, segments)
    }

    /// Nested resource of an item, e.g. `builds/id:42/statistics`.
    pub(crate) fn item_child(kind: ResourceKind, id: &str, child: &str) -> Self {
        let mut query = Self::item(kind, id);
        query.segments.extend(split_path(child));
        query
    }

    /// Decode the response as items of another kind, e.g. the properties of a build.
    pub(crate) const fn listing(mut self, kind: ResourceKind) -> Self {
        self.kind = kind;
        self
    }

    const fn at(kind: ResourceKind, segments: Vec<String>) -> Self {
        Self {
            kind,
            segments,
            filters: Vec::new(),
            params: Vec::new(),
        }
    }

    /// Add a locator dimension; blank values are skipped and values
    /// containing `,` are wrapped in parentheses.
    pub(crate) fn filter(mut self, key: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        if !value.trim().is_empty() {
            self.filters.push((key.to_string(), locator_value(value)));
        }
        self
    }

    pub(crate) fn filter_opt(self, key: &str, value: Option<&str>) -> Self {
        match value {
            Some(value) => self.filter(key, value),
            None => self,
        }
    }

    pub(crate) fn param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.push((key.to_string(), value.into()));
        self
    }

    pub(crate) const fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Slash-joined path, unescaped; for messages.
    pub(crate) fn path(&self) -> String {
        self.segments.join("/")
    }

    pub(crate) fn segments(&self) -> &[String] {
        &self.segments
    }

    /// `dim:value,dim:value` in insertion order, or `None` without filters.
    pub(crate) fn locator(&self) -> Option<String> {
        if self.filters.is_empty() {
            return None;
        }
        Some(
            self.filters
                .iter()
                .map(|(key, value)| format!("{key}:{value}"))
                .collect::<Vec<_>>()
                .join(","),
        )
    }

    /// Append the locator and parameters to an already resolved URL.
    pub(crate) fn apply(&self, url: &mut Url) {
        let locator = self.locator();
        if locator.is_none() && self.params.is_empty() {
            return;
        }
        let mut pairs = url.query_pairs_mut();
        if let Some(locator) = &locator {
            pairs.append_pair("locator", locator);
        }
        for (key, value) in &self.params {
            pairs.append_pair(key, value);
        }
    }
}

fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// A comma would end the dimension, so such values are parenthesised
/// unless they already are.
fn locator_value(value: String) -> String {
    if value.contains(',') && !(value.starts_with('(') && value.ends_with(')')) {
        format!("({value})")
    } else {
        value
    }
}

/// Build a `fields=` selector such as `count,build(id,number,triggered(user(username)))`.
///
/// `base` entries are always requested; each column adds its top-level field,
/// with dotted columns (`pool.name`) expanded into nested selectors
/// (`pool(name)`). Columns listed in `derived` are computed locally and never
/// requested.
pub(crate) fn fields_selector(
    item_key: &str,
    base: &[&str],
    columns: &[String],
    derived: &[&str],
) -> String {
    let mut selected: Vec<String> = Vec::new();
    let mut push = |field: String| {
        if !selected.contains(&field) {
            selected.push(field);
        }
    };
    for field in base {
        push((*field).to_string());
    }
    for column in columns {
        let column = column.trim();
        if column.is_empty() || derived.contains(&column) {
            continue;
        }
        push(nested_selector(column));
    }
    format!("count,{item_key}({})", selected.join(","))
}

fn nested_selector(path: &str) -> String {
    let mut segments = path.rsplit('.');
    let last = segments.next().unwrap_or(path).to_string();
    segments.fold(last, |inner, outer| format!("{outer}({inner})"))
}

/// Split a `--columns` value into trimmed, non-empty names.
pub(crate) fn parse_columns(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|column| !column.is_empty())
        .map(str::to_string)
        .collect()
}

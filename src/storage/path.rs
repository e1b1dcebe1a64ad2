//! Path to object-key translation / 路径与对象键转换
//!
//! Directories do not exist in object storage; a logical directory is just
//! the key prefix ending in exactly one `/`. All key building goes through
//! [`KeyTranslator`] so operations never concatenate keys by hand.

/// Strip leading and trailing separators from a key prefix / 规范化前缀
pub fn normalize_prefix(prefix: &str) -> String {
    prefix.trim_matches('/').to_string()
}

/// Turn a key into a directory prefix with exactly one trailing `/`.
///
/// An empty key stays empty so the listing covers the whole bucket.
pub fn dir_prefix(key: &str) -> String {
    let trimmed = key.trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

/// Converts caller paths into backend keys for one filesystem instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTranslator {
    root_path: String,
    prefix: String,
}

impl KeyTranslator {
    /// Root is `endpoint/bucket/prefix`, computed once / 根路径只计算一次
    pub fn new(endpoint: &str, bucket: &str, prefix: &str) -> Self {
        let prefix = normalize_prefix(prefix);
        Self {
            root_path: format!("{}/{}/{}", endpoint, bucket, prefix),
            prefix,
        }
    }

    pub fn root_path(&self) -> &str {
        &self.root_path
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Resolve a path to its object key.
    ///
    /// Paths starting with the root have the root stripped; anything else is
    /// taken as relative. Purely textual: no `..` or `//` handling.
    pub fn get_key(&self, path: &str) -> String {
        let rest = match path.strip_prefix(self.root_path.as_str()) {
            Some(rest) => rest.strip_prefix('/').unwrap_or(rest),
            None => path,
        };
        if rest.is_empty() {
            self.prefix.clone()
        } else if self.prefix.is_empty() {
            rest.to_string()
        } else {
            format!("{}/{}", self.prefix, rest)
        }
    }

    /// Key of `path` as a directory prefix / 目录前缀
    pub fn get_dir_prefix(&self, path: &str) -> String {
        dir_prefix(&self.get_key(path))
    }

    /// Caller-facing full path of a key: `endpoint/bucket/key`
    pub fn full_path(&self, endpoint: &str, bucket: &str, key: &str) -> String {
        format!("{}/{}/{}", endpoint.trim_end_matches('/'), bucket, key)
    }
}

//! Object keys for uploaded course files.

use std::collections::HashSet;

/// Namespace all uploaded course files live under.
pub const COURSE_PREFIX: &str = "courses";

/// Make an untrusted value safe to use as a single key segment.
///
/// Separators and control characters become `_`, and segments that would act
/// as relative path components (`.`, `..`) or vanish entirely are replaced.
pub fn sanitize_segment(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// Build the key `courses/<courseId>/<timestamp>-<filename>`.
pub fn course_file_key(course_id: &str, timestamp_ms: i64, filename: &str) -> String {
    format!(
        "{COURSE_PREFIX}/{}/{timestamp_ms}-{}",
        sanitize_segment(course_id),
        sanitize_segment(filename)
    )
}

/// Hands out keys for one upload batch, never repeating a key.
///
/// Two files with the same name uploaded in the same millisecond would
/// otherwise overwrite each other; the timestamp is bumped until the key is
/// free.
#[derive(Debug, Default)]
pub struct BatchKeys {
    used: HashSet<String>,
}

impl BatchKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, course_id: &str, timestamp_ms: i64, filename: &str) -> String {
        let mut ts = timestamp_ms;
        loop {
            let key = course_file_key(course_id, ts, filename);
            if self.used.insert(key.clone()) {
                return key;
            }
            ts += 1;
        }
    }
}

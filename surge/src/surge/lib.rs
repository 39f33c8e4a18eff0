#![allow(clippy::upper_case_acronyms)]

pub mod http_util;
mod registry;

pub use registry::{JobRegistry, JobReport};

use lazy_static::lazy_static;
use regex::Regex;
use uuid::Uuid;

lazy_static! {
    static ref UUID_SUFFIX: Regex =
        Regex::new(r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$").unwrap();
}

/// Unique id for a job. A name that already ends with a uuid is kept as is, others get one
/// appended.
pub fn job_id(name: &Option<String>) -> String {
    name.as_ref().map_or(Uuid::new_v4().to_string(), |n| {
        if UUID_SUFFIX.is_match(n) {
            n.clone()
        } else {
            let mut name = n.trim().to_string();
            name.push('-');
            name.push_str(Uuid::new_v4().to_string().as_str());
            name
        }
    })
}

#[cfg(test)]
mod test {
    use crate::job_id;

    #[test]
    fn job_id_from_name() {
        let id = job_id(&Some(" stress ".to_string()));
        assert!(id.starts_with("stress-"));
        assert_eq!(id.len(), "stress-".len() + 36);
        assert_eq!(job_id(&Some(id.clone())), id);
        assert_eq!(job_id(&None).len(), 36);
    }
}

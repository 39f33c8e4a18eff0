use crate::{ProfileError, Target};
use http::uri::PathAndQuery;
use http::Uri;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A request target and how often it's picked relative to the others.
///
/// `template` is either a path (`/api/cpu-intensive?iterations=200000`) resolved against the
/// profile's target, or an absolute `http://` uri used as is.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EndpointSpec {
    pub template: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl EndpointSpec {
    pub fn new(template: &str, weight: f64) -> Self {
        Self {
            template: template.to_string(),
            weight,
        }
    }

    pub fn uniform(template: &str) -> Self {
        Self::new(template, default_weight())
    }

    pub fn resolve(&self, target: &Target) -> Result<Uri, ProfileError> {
        let invalid = |_| ProfileError::InvalidTemplate(self.template.clone());
        if self.template.starts_with('/') {
            Uri::builder()
                .scheme("http")
                .authority(target.authority().as_str())
                .path_and_query(PathAndQuery::from_str(&self.template).map_err(invalid)?)
                .build()
                .map_err(|_| ProfileError::InvalidTemplate(self.template.clone()))
        } else {
            let uri = Uri::from_str(&self.template).map_err(invalid)?;
            match (uri.scheme_str(), uri.authority()) {
                (Some("http"), Some(_)) => Ok(uri),
                _ => Err(ProfileError::InvalidTemplate(self.template.clone())),
            }
        }
    }
}

fn default_weight() -> f64 {
    1f64
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EndpointSpecShadowType {
    Template(String),
    Weighted(EndpointSpec),
}

/// Endpoints of a profile; guaranteed non-empty with at least one positive weight
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(try_from = "Vec<EndpointSpecShadowType>", into = "Vec<EndpointSpec>")]
pub struct EndpointSet {
    endpoints: Vec<EndpointSpec>,
}

impl EndpointSet {
    pub fn new(endpoints: Vec<EndpointSpec>) -> Result<Self, ProfileError> {
        if endpoints.is_empty() {
            return Err(ProfileError::NoEndpoints);
        }
        for endpoint in endpoints.iter() {
            if !endpoint.weight.is_finite() || endpoint.weight < 0f64 {
                return Err(ProfileError::InvalidWeight {
                    template: endpoint.template.clone(),
                    weight: endpoint.weight,
                });
            }
            if !endpoint.template.starts_with('/') && !endpoint.template.starts_with("http://") {
                return Err(ProfileError::InvalidTemplate(endpoint.template.clone()));
            }
        }
        if endpoints.iter().all(|e| e.weight == 0f64) {
            return Err(ProfileError::AllWeightsZero);
        }
        Ok(Self { endpoints })
    }

    pub fn uniform(templates: &[&str]) -> Result<Self, ProfileError> {
        Self::new(templates.iter().map(|t| EndpointSpec::uniform(t)).collect())
    }

    pub fn iter(&self) -> impl Iterator<Item = &EndpointSpec> {
        self.endpoints.iter()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

impl TryFrom<Vec<EndpointSpecShadowType>> for EndpointSet {
    type Error = ProfileError;

    fn try_from(value: Vec<EndpointSpecShadowType>) -> Result<Self, Self::Error> {
        let endpoints = value
            .into_iter()
            .map(|e| match e {
                EndpointSpecShadowType::Template(template) => EndpointSpec::uniform(&template),
                EndpointSpecShadowType::Weighted(spec) => spec,
            })
            .collect();
        EndpointSet::new(endpoints)
    }
}

impl From<EndpointSet> for Vec<EndpointSpec> {
    fn from(value: EndpointSet) -> Self {
        value.endpoints
    }
}

#[cfg(test)]
mod test {
    use crate::endpoint_specs::{EndpointSet, EndpointSpec};
    use crate::{ProfileError, Scheme, Target};

    fn target() -> Target {
        Target {
            host: "app".to_string(),
            port: 8080,
            protocol: Scheme::HTTP,
        }
    }

    #[test]
    fn deserialize_mixed_forms() {
        let set: EndpointSet = serde_json::from_str(
            r#"[
                "/actuator/health",
                {"template": "/api/cpu-intensive?iterations=200000", "weight": 3},
                {"template": "http://other:9090/api/memory-intensive?sizeMb=50"}
            ]"#,
        )
        .unwrap();
        assert_eq!(set.len(), 3);
        let weights = set.iter().map(|e| e.weight).collect::<Vec<_>>();
        assert_eq!(weights, vec![1f64, 3f64, 1f64]);
    }

    #[test]
    fn resolve_against_target() {
        let uri = EndpointSpec::uniform("/api/cpu-intensive?iterations=200000")
            .resolve(&target())
            .unwrap();
        assert_eq!(
            uri.to_string(),
            "http://app:8080/api/cpu-intensive?iterations=200000"
        );
        let uri = EndpointSpec::uniform("http://other:9090/x")
            .resolve(&target())
            .unwrap();
        assert_eq!(uri.host(), Some("other"));
    }

    #[test]
    fn reject_misconfiguration() {
        assert!(matches!(
            EndpointSet::new(vec![]),
            Err(ProfileError::NoEndpoints)
        ));
        assert!(matches!(
            EndpointSet::new(vec![EndpointSpec::new("/a", 0f64), EndpointSpec::new("/b", 0f64)]),
            Err(ProfileError::AllWeightsZero)
        ));
        assert!(matches!(
            EndpointSet::new(vec![EndpointSpec::new("/a", -1f64)]),
            Err(ProfileError::InvalidWeight { .. })
        ));
        assert!(matches!(
            EndpointSet::new(vec![EndpointSpec::new("/a", f64::NAN)]),
            Err(ProfileError::InvalidWeight { .. })
        ));
        assert!(matches!(
            EndpointSet::new(vec![EndpointSpec::uniform("api/no-slash")]),
            Err(ProfileError::InvalidTemplate(_))
        ));
        assert!(serde_json::from_str::<EndpointSet>("[]").is_err());
        // one zero weight among positive ones is fine
        assert!(
            EndpointSet::new(vec![EndpointSpec::new("/a", 0f64), EndpointSpec::new("/b", 2f64)])
                .is_ok()
        );
    }
}

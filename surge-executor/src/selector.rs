use http::Uri;
use surge_http::{EndpointSet, ProfileError, Target};

#[derive(Debug, Clone)]
pub struct Endpoint {
    pub template: String,
    pub uri: Uri,
}

/// Weighted choice of the endpoint to hit next, with replacement. Equal weights give a uniform
/// choice.
#[derive(Debug)]
pub struct EndpointSelector {
    endpoints: Vec<Endpoint>,
    // normalised, non-decreasing, last one is 1
    cumulative: Vec<f64>,
    // fallback when rounding leaves the draw above every cumulative weight
    last_positive: usize,
}

impl EndpointSelector {
    pub fn new(endpoints: &EndpointSet, target: &Target) -> Result<Self, ProfileError> {
        let total: f64 = endpoints.iter().map(|e| e.weight).sum();
        if total <= 0f64 || !total.is_finite() {
            return Err(ProfileError::AllWeightsZero);
        }
        let mut resolved = Vec::with_capacity(endpoints.len());
        let mut cumulative = Vec::with_capacity(endpoints.len());
        let mut sum = 0f64;
        let mut last_positive = 0;
        for (i, spec) in endpoints.iter().enumerate() {
            resolved.push(Endpoint {
                template: spec.template.clone(),
                uri: spec.resolve(target)?,
            });
            sum += spec.weight;
            cumulative.push(sum / total);
            if spec.weight > 0f64 {
                last_positive = i;
            }
        }
        Ok(Self {
            endpoints: resolved,
            cumulative,
            last_positive,
        })
    }

    pub fn select(&self) -> &Endpoint {
        self.pick(fastrand::f64())
    }

    pub fn select_with(&self, rng: &fastrand::Rng) -> &Endpoint {
        self.pick(rng.f64())
    }

    /// `draw` in `[0, 1)`
    fn pick(&self, draw: f64) -> &Endpoint {
        let idx = self
            .cumulative
            .iter()
            .position(|c| *c > draw)
            .unwrap_or(self.last_positive);
        &self.endpoints[idx]
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

#[cfg(test)]
mod test {
    use crate::selector::EndpointSelector;
    use more_asserts::{assert_gt, assert_lt};
    use std::collections::HashMap;
    use surge_http::{EndpointSet, EndpointSpec, Scheme, Target};

    fn target() -> Target {
        Target {
            host: "app".to_string(),
            port: 8080,
            protocol: Scheme::HTTP,
        }
    }

    fn frequencies(selector: &EndpointSelector, n: usize) -> HashMap<String, usize> {
        let rng = fastrand::Rng::with_seed(7);
        let mut counts = HashMap::new();
        for _ in 0..n {
            *counts
                .entry(selector.select_with(&rng).template.clone())
                .or_default() += 1;
        }
        counts
    }

    #[test]
    fn uniform_converges() {
        let endpoints = EndpointSet::uniform(&["/a", "/b", "/c", "/d"]).unwrap();
        let selector = EndpointSelector::new(&endpoints, &target()).unwrap();
        let n = 100_000;
        let counts = frequencies(&selector, n);
        for template in ["/a", "/b", "/c", "/d"] {
            let share = counts[template] as f64 / n as f64;
            assert_gt!(share, 0.24);
            assert_lt!(share, 0.26);
        }
    }

    #[test]
    fn weighted_converges() {
        let endpoints = EndpointSet::new(vec![
            EndpointSpec::new("/light", 1f64),
            EndpointSpec::new("/never", 0f64),
            EndpointSpec::new("/heavy", 3f64),
        ])
        .unwrap();
        let selector = EndpointSelector::new(&endpoints, &target()).unwrap();
        let n = 100_000;
        let counts = frequencies(&selector, n);
        assert!(!counts.contains_key("/never"));
        let share = counts["/heavy"] as f64 / n as f64;
        assert_gt!(share, 0.74);
        assert_lt!(share, 0.76);
    }

    #[test]
    fn draw_edges() {
        let endpoints = EndpointSet::new(vec![
            EndpointSpec::new("/first", 1f64),
            EndpointSpec::new("/second", 1f64),
            EndpointSpec::new("/zero", 0f64),
        ])
        .unwrap();
        let selector = EndpointSelector::new(&endpoints, &target()).unwrap();
        assert_eq!(selector.pick(0f64).template, "/first");
        assert_eq!(selector.pick(0.5).template, "/second");
        // never lands on a zero weight endpoint, even past the last cumulative weight
        assert_eq!(selector.pick(1f64).template, "/second");
        assert_eq!(
            selector.pick(0.25).uri.to_string(),
            "http://app:8080/first"
        );
    }
}

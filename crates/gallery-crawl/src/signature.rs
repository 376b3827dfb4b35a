//! Per-request signature derived from the session seed and the query variables.

/// Header carrying the request signature.
pub const SIGNATURE_HEADER: &str = "X-Instagram-GIS";

/// Compute the signature for a continuation request.
///
/// Returns the lowercase hex MD5 of `seed:variables`, or `None` when no seed
/// is known yet, in which case no header is sent.
pub fn derive(seed: &str, variables: &str) -> Option<String> {
    if seed.is_empty() {
        return None;
    }
    let digest = md5::compute(format!("{seed}:{variables}"));
    Some(format!("{digest:x}"))
}

/// Seed and serialized variables for exactly one outgoing request.
#[derive(Debug, Clone, Default)]
pub struct SigningContext {
    seed: String,
    variables: String,
}

impl SigningContext {
    pub fn new(seed: &str) -> Self {
        Self {
            seed: seed.to_string(),
            variables: String::new(),
        }
    }

    /// Replace the seed and variables for the next request.
    pub fn update(&mut self, seed: &str, variables: &str) {
        self.seed = seed.to_string();
        self.variables = variables.to_string();
    }

    pub fn variables(&self) -> &str {
        &self.variables
    }

    /// The header value for the current request, if any.
    pub fn sign(&self) -> Option<String> {
        derive(&self.seed, &self.variables)
    }
}

/// Carries the per-request log correlator and tenant identity through the
/// engine instead of relying on implicit globals.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub environment_id: String,
    pub activity_log_id: String,
}

impl RequestContext {
    pub fn new(environment_id: impl Into<String>, activity_log_id: impl Into<String>) -> Self {
        Self {
            environment_id: environment_id.into(),
            activity_log_id: activity_log_id.into(),
        }
    }
}

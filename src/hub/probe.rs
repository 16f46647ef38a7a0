use crate::error::InstrumentResult;
use crate::value::Value;

use super::Hub;

/// A named emission point.
///
/// A probe holds nothing but its name and a handle to the hub that created
/// it. Every `update` dispatches synchronously; calling it twice is two
/// events.
#[derive(Debug, Clone)]
pub struct Probe {
    name: String,
    hub: Hub,
}

impl Probe {
    pub(crate) fn new(name: String, hub: Hub) -> Self {
        Self { name, hub }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Publish named values. Each value is dispatched as
    /// `<probe name>.<value name>`.
    pub fn update<K, V, I>(&self, values: I) -> InstrumentResult<()>
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let values = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.hub.dispatch(&self.name, values)
    }
}

//! The hub: routing table and run context.
//!
//! A `Hub` binds probe value names to connected meters and owns the current
//! [`Context`]. Dispatch is synchronous: a probe update runs every matching
//! meter, including any file writes, before returning to the producer.
//!
//! The registry sits behind a single mutex held for the whole fan-out, so
//! producers on several threads are serialized rather than interleaved.
//! Construct one `Hub` per run and hand it to producers and consumers, or use
//! [`get_hub`] for the lazily created hub of the current thread.

mod probe;
mod writer;

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::{Context, ContextValue};
use crate::error::InstrumentResult;
use crate::meter::{Meter, MeterReport, ProbeValues, Record};
use crate::value::Value;

pub use probe::Probe;
pub use writer::Writer;

/// Handle returned by [`Hub::connect_meter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeterId(Uuid);

impl MeterId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MeterId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct MeterEntry {
    id: MeterId,
    meter: Meter,
    writers: Vec<Writer>,
}

#[derive(Debug)]
struct HubState {
    context: Context,
    meters: Vec<MeterEntry>,
    probes: BTreeSet<String>,
    default_writers: Vec<Writer>,
    results: Vec<Record>,
}

impl Default for HubState {
    fn default() -> Self {
        Self {
            context: Context::new(),
            meters: Vec::new(),
            probes: BTreeSet::new(),
            default_writers: Writer::DEFAULTS.to_vec(),
            results: Vec::new(),
        }
    }
}

/// Shared handle to one routing table and context. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct Hub {
    inner: Arc<Mutex<HubState>>,
}

impl Hub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // A meter that panicked mid-dispatch leaves counters it owns stale but the
    // registry itself intact, so keep serving.
    fn state(&self) -> MutexGuard<'_, HubState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a meter. Dispatch visits meters in registration order.
    ///
    /// With `use_default_writers` the meter's records go to the hub's default
    /// writers; without it they are discarded.
    pub fn connect_meter(&self, meter: impl Into<Meter>, use_default_writers: bool) -> MeterId {
        let meter = meter.into();
        let mut state = self.state();
        let id = MeterId::new();
        let writers = if use_default_writers {
            state.default_writers.clone()
        } else {
            Vec::new()
        };
        tracing::debug!(meter = %meter.name(), probes = ?meter.probe_names(), ?writers, "meter connected");
        state.meters.push(MeterEntry { id, meter, writers });
        id
    }

    /// Remove a meter and hand it back.
    pub fn disconnect_meter(&self, id: MeterId) -> Option<Meter> {
        let mut state = self.state();
        let pos = state.meters.iter().position(|e| e.id == id)?;
        Some(state.meters.remove(pos).meter)
    }

    /// Inspect a connected meter.
    pub fn with_meter<R>(&self, id: MeterId, f: impl FnOnce(&Meter) -> R) -> Option<R> {
        let state = self.state();
        state.meters.iter().find(|e| e.id == id).map(|e| f(&e.meter))
    }

    #[must_use]
    pub fn meter_count(&self) -> usize {
        self.state().meters.len()
    }

    /// Add a writer attached to meters connected from now on.
    pub fn add_default_writer(&self, writer: Writer) {
        let mut state = self.state();
        if !state.default_writers.contains(&writer) {
            state.default_writers.push(writer);
        }
    }

    /// Merge entries into the context; they apply to every later dispatch.
    pub fn set_context<K, V, I>(&self, entries: I)
    where
        K: Into<String>,
        V: Into<ContextValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut state = self.state();
        state.context.extend(entries);
        tracing::debug!(context = %state.context.file_key(), "context set");
    }

    pub fn clear_context(&self) {
        self.state().context.clear();
    }

    /// Snapshot of the current context.
    #[must_use]
    pub fn context(&self) -> Context {
        self.state().context.clone()
    }

    /// Probe handle for `name`, registered on first lookup.
    pub fn get_probe(&self, name: &str) -> Probe {
        self.state().probes.insert(name.to_string());
        Probe::new(name.to_string(), self.clone())
    }

    /// Forget a probe name. Existing handles keep dispatching.
    pub fn deregister_probe(&self, name: &str) -> bool {
        self.state().probes.remove(name)
    }

    #[must_use]
    pub fn probe_names(&self) -> Vec<String> {
        self.state().probes.iter().cloned().collect()
    }

    /// Route one probe update to every interested meter.
    ///
    /// Each meter sees the current context and only the values whose names it
    /// declared. The first meter error stops the fan-out and is returned.
    pub fn dispatch(&self, probe_name: &str, values: Vec<(String, Value)>) -> InstrumentResult<()> {
        let named: Vec<(String, Arc<Value>)> = values
            .into_iter()
            .map(|(k, v)| (full_name(probe_name, &k), Arc::new(v)))
            .collect();

        let mut guard = self.state();
        let HubState {
            context,
            meters,
            results,
            ..
        } = &mut *guard;

        for entry in meters.iter_mut() {
            let subset: ProbeValues = named
                .iter()
                .filter(|(name, _)| entry.meter.is_interested(name))
                .map(|(name, v)| (name.clone(), Arc::clone(v)))
                .collect();
            if subset.is_empty() {
                continue;
            }

            tracing::debug!(
                probe = %probe_name,
                meter = %entry.meter.name(),
                values = ?subset.keys().collect::<Vec<_>>(),
                context = %context.file_key(),
                "dispatch"
            );
            let records = entry.meter.update(context, &subset)?;
            for record in &records {
                for writer in &entry.writers {
                    writer.write(record, results);
                }
            }
        }
        Ok(())
    }

    /// Finalize every meter in registration order and route final results.
    pub fn finalize(&self) -> InstrumentResult<Vec<MeterReport>> {
        let mut guard = self.state();
        let HubState {
            context,
            meters,
            results,
            ..
        } = &mut *guard;

        let mut reports = Vec::with_capacity(meters.len());
        for entry in meters.iter_mut() {
            let report = entry.meter.finalize()?;
            if let Some(value) = report.final_value() {
                let record = Record::new(entry.meter.name(), context, value, true);
                for writer in &entry.writers {
                    writer.write(&record, results);
                }
            }
            reports.push(report);
        }
        Ok(reports)
    }

    /// Records collected by the results writer so far.
    ///
    /// The buffer grows for the hub's lifetime; long runs should drain it
    /// with [`Hub::take_results`] or connect meters without the results
    /// writer.
    #[must_use]
    pub fn results(&self) -> Vec<Record> {
        self.state().results.clone()
    }

    /// Drain the collected records.
    pub fn take_results(&self) -> Vec<Record> {
        std::mem::take(&mut self.state().results)
    }
}

fn full_name(probe_name: &str, value_name: &str) -> String {
    match (probe_name.is_empty(), value_name.is_empty()) {
        (_, true) => probe_name.to_string(),
        (true, false) => value_name.to_string(),
        (false, false) => format!("{probe_name}.{value_name}"),
    }
}

thread_local! {
    static DEFAULT_HUB: Hub = Hub::new();
}

/// The current thread's hub, created on first access.
#[must_use]
pub fn get_hub() -> Hub {
    DEFAULT_HUB.with(Hub::clone)
}

/// Shorthand for `get_hub().get_probe(name)`.
#[must_use]
pub fn get_probe(name: &str) -> Probe {
    get_hub().get_probe(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meter::{AggregateMeter, FinalAggregation, MetricFn};

    fn echo() -> MetricFn {
        Box::new(|args: &[&Value]| Ok(args[0].as_float().unwrap_or(f64::NAN)))
    }

    #[test]
    fn test_full_name() {
        assert_eq!(full_name("scenario", "x"), "scenario.x");
        assert_eq!(full_name("scenario.x", ""), "scenario.x");
        assert_eq!(full_name("", "x"), "x");
    }

    #[test]
    fn test_dispatch_routes_by_name() {
        let hub = Hub::new();
        let id = hub.connect_meter(AggregateMeter::new("loss", echo(), ["scenario.loss"]), true);
        let probe = hub.get_probe("scenario");

        probe.update([("loss", 1.5), ("other", 9.0)]).unwrap();
        hub.get_probe("elsewhere").update([("loss", 7.0)]).unwrap();

        let seen = hub
            .with_meter(id, |m| match m {
                Meter::Aggregate(a) => a.measurements().to_vec(),
                _ => Vec::new(),
            })
            .unwrap();
        assert_eq!(seen, vec![1.5]);
    }

    #[test]
    fn test_duplicate_updates_are_separate_events() {
        let hub = Hub::new();
        hub.connect_meter(AggregateMeter::new("loss", echo(), ["s.loss"]), true);
        let probe = hub.get_probe("s");
        probe.update([("loss", 1.0)]).unwrap();
        probe.update([("loss", 1.0)]).unwrap();
        assert_eq!(hub.results().len(), 2);
    }

    #[test]
    fn test_take_results_drains_buffer() {
        let hub = Hub::new();
        hub.connect_meter(AggregateMeter::new("loss", echo(), ["s.loss"]), true);
        let probe = hub.get_probe("s");
        probe.update([("loss", 1.0)]).unwrap();
        probe.update([("loss", 2.0)]).unwrap();

        assert_eq!(hub.take_results().len(), 2);
        assert!(hub.results().is_empty());
        probe.update([("loss", 3.0)]).unwrap();
        assert_eq!(hub.results().len(), 1);
    }

    #[test]
    fn test_records_carry_context() {
        let hub = Hub::new();
        hub.connect_meter(AggregateMeter::new("loss", echo(), ["s.loss"]), true);
        hub.set_context([("batch", 4)]);
        hub.get_probe("s").update([("loss", 2.0)]).unwrap();

        let results = hub.results();
        assert_eq!(results[0].context.batch(), Some(4));
    }

    #[test]
    fn test_without_default_writers_records_are_dropped() {
        let hub = Hub::new();
        hub.connect_meter(AggregateMeter::new("loss", echo(), ["s.loss"]), false);
        hub.get_probe("s").update([("loss", 2.0)]).unwrap();
        assert!(hub.results().is_empty());
    }

    #[test]
    fn test_context_persists_until_changed() {
        let hub = Hub::new();
        hub.set_context([("batch", 1)]);
        hub.set_context([("stage", "attack")]);
        let ctx = hub.context();
        assert_eq!(ctx.batch(), Some(1));
        assert_eq!(ctx.get("stage"), Some(&ContextValue::from("attack")));

        hub.clear_context();
        assert!(hub.context().is_empty());
    }

    #[test]
    fn test_finalize_emits_final_record() {
        let hub = Hub::new();
        hub.connect_meter(
            AggregateMeter::new("loss", echo(), ["s.loss"])
                .final_aggregation(FinalAggregation::Sum)
                .record_final_only(true),
            true,
        );
        let probe = hub.get_probe("s");
        probe.update([("loss", 1.0)]).unwrap();
        probe.update([("loss", 2.0)]).unwrap();

        let reports = hub.finalize().unwrap();
        assert_eq!(reports.len(), 1);
        let results = hub.results();
        assert_eq!(results.len(), 1);
        assert!(results[0].is_final);
        assert_eq!(results[0].value, serde_json::json!(3.0));
    }

    #[test]
    fn test_disconnect_returns_meter() {
        let hub = Hub::new();
        let id = hub.connect_meter(AggregateMeter::new("loss", echo(), ["s.loss"]), false);
        assert_eq!(hub.meter_count(), 1);
        let meter = hub.disconnect_meter(id).unwrap();
        assert_eq!(meter.name(), "loss");
        assert_eq!(hub.meter_count(), 0);
        assert!(hub.disconnect_meter(id).is_none());
    }

    #[test]
    fn test_probe_registry() {
        let hub = Hub::new();
        hub.get_probe("scenario");
        hub.get_probe("scenario");
        hub.get_probe("model");
        assert_eq!(hub.probe_names(), vec!["model".to_string(), "scenario".to_string()]);
        assert!(hub.deregister_probe("model"));
        assert!(!hub.deregister_probe("model"));
    }

    #[test]
    fn test_thread_local_hub_is_shared() {
        let a = get_hub();
        let b = get_hub();
        a.set_context([("thread_local_check", 1)]);
        assert_eq!(b.context().get("thread_local_check"), Some(&ContextValue::Int(1)));
    }
}

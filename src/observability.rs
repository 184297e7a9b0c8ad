use biometrics::{Collector, Counter, Moments};

pub(crate) static RENDER_REPARSES: Counter = Counter::new("mdstream.render.reparses");
pub(crate) static RENDER_DEGRADATIONS: Counter = Counter::new("mdstream.render.degradations");
pub(crate) static RENDER_REGIONS_COMMITTED: Counter =
    Counter::new("mdstream.render.regions_committed");
pub(crate) static RENDER_SINK_ERRORS: Counter = Counter::new("mdstream.render.sink_errors");
pub(crate) static RENDER_REPARSE_DURATION: Moments =
    Moments::new("mdstream.render.reparse_duration_seconds");

pub(crate) static SNIPPETS_REGISTERED: Counter = Counter::new("mdstream.snippets.registered");
pub(crate) static SNIPPETS_TRUNCATED: Counter = Counter::new("mdstream.snippets.truncated");

pub(crate) static REPLAY_DELTAS: Counter = Counter::new("mdstream.replay.deltas");
pub(crate) static REPLAY_INTERRUPTS: Counter = Counter::new("mdstream.replay.interrupts");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&RENDER_REPARSES);
    collector.register_counter(&RENDER_DEGRADATIONS);
    collector.register_counter(&RENDER_REGIONS_COMMITTED);
    collector.register_counter(&RENDER_SINK_ERRORS);
    collector.register_moments(&RENDER_REPARSE_DURATION);

    collector.register_counter(&SNIPPETS_REGISTERED);
    collector.register_counter(&SNIPPETS_TRUNCATED);

    collector.register_counter(&REPLAY_DELTAS);
    collector.register_counter(&REPLAY_INTERRUPTS);
}

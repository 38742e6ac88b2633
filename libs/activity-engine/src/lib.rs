pub mod ingress;
mod listener;
#[cfg(test)]
mod testing;

pub use ingress::{ChannelSource, Dispatcher, deliver, spawn_source_task};
pub use listener::{ActivityListener, HandleReport, RelationalOutcome, SearchOutcome};

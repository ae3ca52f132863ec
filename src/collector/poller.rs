//! Periodic device polling.

mod collector;
mod rate;
mod source;

pub use collector::{DEFAULT_AGENT_PORT, DevicePoller, PolledDevice, PollerConfig};
pub use rate::{Counter, RateState};
pub use source::{
    CounterSample, CounterSource, DEFAULT_SHELL_COMMAND, FetchError, IF_HC_IN_OCTETS,
    IF_HC_OUT_OCTETS, MetricSource, ShellCounters, SnmpCounters, parse_numeric,
    parse_proc_net_dev, try_parse_numeric,
};

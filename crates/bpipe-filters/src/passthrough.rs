//! A filter that forwards every batch unchanged. One input, one output.

use crate::map::{map_filter, Identity};
use bpipe_core::{FilterConfig, GenericFilter};

#[must_use]
pub fn passthrough_filter(name: impl Into<String>, config: FilterConfig) -> GenericFilter {
    map_filter(name, config, Identity)
}

//! Consensus-builder boundary.
//!
//! Consensus base-calling is an external collaborator: this module only
//! defines the seam it plugs into and the marker attribute consensus reads
//! carry so a re-run of the pipeline can detect and skip them.

use noodles::sam::alignment::RecordBuf;
use noodles::sam::alignment::record::data::field::Tag;

use crate::read_info::DuplicateGroup;

/// Tag marking a record as a consensus-built read (`cM`).
pub const CONSENSUS_MARKER_TAG: Tag = Tag::new(b'c', b'M');

/// True when the record was produced by a previous consensus-building run.
///
/// Such records are passed through untouched and never re-grouped.
#[must_use]
pub fn is_consensus_read(record: &RecordBuf) -> bool {
    record.data().get(&CONSENSUS_MARKER_TAG).is_some()
}

/// Builds one synthetic read summarizing a duplicate group.
///
/// Implemented by the downstream consensus caller; the collapsing pipeline
/// treats it as a pure function of the group.
pub trait ConsensusBuilder {
    /// Produces the consensus read for `group`, or `None` when the group
    /// does not meet the caller's requirements.
    fn build_consensus(&self, group: &DuplicateGroup) -> Option<RecordBuf>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sam::builder::RecordBuilder;

    #[test]
    fn test_marker_detection() {
        let plain = RecordBuilder::new().sequence("ACGT").alignment_start(1).build();
        assert!(!is_consensus_read(&plain));

        let consensus = RecordBuilder::new()
            .sequence("ACGT")
            .alignment_start(1)
            .tag("cM", 1)
            .build();
        assert!(is_consensus_read(&consensus));
    }
}

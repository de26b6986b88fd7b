//! Node label keys shared between the node labeller, this controller and
//! the scheduler.

/// Marks a node as able to run virtual machines (`"true"`).
pub const NODE_SCHEDULABLE: &str = "kubevirt.io/schedulable";

/// Native invariant TSC frequency of the node in Hz.
pub const TSC_FREQUENCY_LABEL: &str = "cpu-timer.node.kubevirt.io/tsc-frequency";

/// Whether the hypervisor can present a lower TSC frequency to a guest.
pub const TSC_SCALABLE_LABEL: &str = "cpu-timer.node.kubevirt.io/tsc-scalable";

/// Prefix of the per-frequency markers; the full key is
/// `<prefix>-<frequency>`.
pub const TSC_FREQUENCY_SCHEDULING_LABEL: &str = "scheduling.node.kubevirt.io/tsc-frequency";

pub const CPU_MODEL_VENDOR_LABEL: &str = "cpu-vendor.node.kubevirt.io/";

pub const CPU_MODEL_LABEL: &str = "cpu-model.node.kubevirt.io/";

/// Value used for presence-style marker labels.
pub const LABEL_TRUE: &str = "true";

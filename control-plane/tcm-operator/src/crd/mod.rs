pub mod test_cluster;
pub mod v1alpha1;

pub use test_cluster::{
    API_GROUP, TestCluster, TestClusterSpec, TestClusterStatus, WorkloadSpec,
    decode_request,
};

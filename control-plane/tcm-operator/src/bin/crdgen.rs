use kube::core::CustomResourceExt;
use kube::core::crd::merge_crds;
use tcm_operator::crd::{TestCluster, test_cluster::STORAGE_VERSION, v1alpha1};

fn main() {
    let crd = merge_crds(
        vec![v1alpha1::TestCluster::crd(), TestCluster::crd()],
        STORAGE_VERSION,
    )
    .expect("merge TestCluster versions");
    let yaml = serde_yaml::to_string(&crd).expect("serialize CRD to YAML");
    println!("{}", yaml);
}

use kube::core::CustomResourceExt;
use oprc_refguard::crd::managed_cluster::ManagedCluster;

fn main() -> anyhow::Result<()> {
    let crd = ManagedCluster::crd();
    let yaml = serde_yaml::to_string(&crd)?;
    println!("{}", yaml);
    Ok(())
}

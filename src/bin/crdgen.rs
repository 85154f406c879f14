use anyhow::Context;
use kube::CustomResourceExt;
use kubeedge_apps::crd::{EdgeApplication, NodeGroup};

fn main() -> anyhow::Result<()> {
    let node_group = serde_yaml::to_string(&NodeGroup::crd()).context("serializing NodeGroup CRD")?;
    let edge_application =
        serde_yaml::to_string(&EdgeApplication::crd()).context("serializing EdgeApplication CRD")?;
    print!("{node_group}---\n{edge_application}");
    Ok(())
}

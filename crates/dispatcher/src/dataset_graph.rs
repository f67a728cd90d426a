//! 数据集图的归一化与指纹计算

use sha2::{Digest as _, Sha256};

use dataservice_core::{
    models::{AttrValue, DatasetDef, NodeDef},
    DataServiceResult,
};

/// 共享资源类算子，归一化时强制按节点名共享，避免相同数据集因资源名不同而指纹不同
pub const SHARED_RESOURCE_OPS: [&str; 8] = [
    "HashTable",
    "HashTableV2",
    "MutableHashTable",
    "MutableHashTableV2",
    "MutableDenseHashTable",
    "MutableDenseHashTableV2",
    "MutableHashTableOfTensors",
    "MutableHashTableOfTensorsV2",
];

pub const USE_NODE_NAME_SHARING: &str = "use_node_name_sharing";

fn normalize_node(node: &mut NodeDef) {
    node.device.clear();
    if SHARED_RESOURCE_OPS.contains(&node.op.as_str()) {
        node.attrs
            .insert(USE_NODE_NAME_SHARING.to_string(), AttrValue::Bool(true));
    }
}

/// 返回归一化后的数据集：清除图和函数库中的设备放置，共享资源算子开启按名共享
pub fn prepare_dataset(dataset: &DatasetDef) -> DatasetDef {
    let mut prepared = dataset.clone();
    prepared.graph.nodes.iter_mut().for_each(normalize_node);
    prepared
        .graph
        .library
        .functions
        .iter_mut()
        .flat_map(|function| function.nodes.iter_mut())
        .for_each(normalize_node);
    prepared
}

/// 对（已归一化的）数据集图计算指纹：规范JSON的SHA-256前8字节，大端序
pub fn fingerprint(dataset: &DatasetDef) -> DataServiceResult<u64> {
    let bytes = serde_json::to_vec(&dataset.graph)?;
    let digest = Sha256::digest(&bytes);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    Ok(u64::from_be_bytes(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataservice_core::models::{FunctionDef, GraphDef};

    fn graph_with_devices(device: &str) -> DatasetDef {
        DatasetDef::new(GraphDef {
            nodes: vec![
                NodeDef::new("table", "HashTableV2").with_device(device),
                NodeDef::new("range", "RangeDataset")
                    .with_device(device)
                    .with_attr("stop", AttrValue::Int(10)),
            ],
            library: dataservice_core::models::FunctionLibrary {
                functions: vec![FunctionDef {
                    name: "map_fn".to_string(),
                    nodes: vec![NodeDef::new("add", "AddV2").with_device(device)],
                }],
            },
        })
    }

    #[test]
    fn test_prepare_strips_devices_everywhere() {
        let prepared = prepare_dataset(&graph_with_devices("/job:worker/device:GPU:0"));

        assert!(prepared.graph.nodes.iter().all(|n| n.device.is_empty()));
        assert!(prepared.graph.library.functions[0]
            .nodes
            .iter()
            .all(|n| n.device.is_empty()));
    }

    #[test]
    fn test_prepare_forces_name_sharing_on_hash_tables() {
        let prepared = prepare_dataset(&graph_with_devices(""));

        assert_eq!(
            prepared.graph.nodes[0].attr(USE_NODE_NAME_SHARING),
            Some(&AttrValue::Bool(true))
        );
        assert_eq!(prepared.graph.nodes[1].attr(USE_NODE_NAME_SHARING), None);
    }

    #[test]
    fn test_fingerprint_ignores_device_placement() {
        let cpu = fingerprint(&prepare_dataset(&graph_with_devices("/device:CPU:0"))).unwrap();
        let gpu = fingerprint(&prepare_dataset(&graph_with_devices("/device:GPU:1"))).unwrap();
        assert_eq!(cpu, gpu);
    }

    #[test]
    fn test_fingerprint_distinguishes_content() {
        let a = fingerprint(&prepare_dataset(&graph_with_devices(""))).unwrap();
        let mut other = graph_with_devices("");
        other.graph.nodes[1]
            .attrs
            .insert("stop".to_string(), AttrValue::Int(11));
        let b = fingerprint(&prepare_dataset(&other)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let dataset = prepare_dataset(&graph_with_devices(""));
        assert_eq!(fingerprint(&dataset).unwrap(), fingerprint(&dataset.clone()).unwrap());
    }
}

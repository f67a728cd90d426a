use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 引擎产生的单个元素，对协调层不透明
pub type Element = serde_json::Value;

/// 分布式epoch模式下的数据切片，对协调层不透明
pub type Split = serde_json::Value;

/// 数据集定义
///
/// 协调层只会修改归一化所需的字段（设备放置与共享资源属性），其余内容原样透传。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DatasetDef {
    pub graph: GraphDef,
}

impl DatasetDef {
    pub fn new(graph: GraphDef) -> Self {
        Self { graph }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphDef {
    #[serde(default)]
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub library: FunctionLibrary,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FunctionLibrary {
    #[serde(default)]
    pub functions: Vec<FunctionDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<NodeDef>,
}

/// 计算图节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDef {
    pub name: String,
    pub op: String,
    /// 设备放置，归一化时清空
    #[serde(default)]
    pub device: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub attrs: BTreeMap<String, AttrValue>,
}

impl NodeDef {
    pub fn new(name: impl Into<String>, op: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op: op.into(),
            device: String::new(),
            inputs: Vec::new(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = device.into();
        self
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.inputs.push(input.into());
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: AttrValue) -> Self {
        self.attrs.insert(key.into(), value);
        self
    }

    pub fn attr(&self, key: &str) -> Option<&AttrValue> {
        self.attrs.get(key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<AttrValue>),
}

impl AttrValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

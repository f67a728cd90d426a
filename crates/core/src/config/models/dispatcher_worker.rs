use serde::{Deserialize, Serialize};

/// 当前支持的RPC协议
pub const SUPPORTED_PROTOCOLS: [&str; 2] = ["http", "https"];

fn validate_protocol(protocol: &str) -> anyhow::Result<()> {
    if !SUPPORTED_PROTOCOLS.contains(&protocol) {
        return Err(anyhow::anyhow!(
            "无效的协议: {}，支持的协议: {:?}",
            protocol,
            SUPPORTED_PROTOCOLS
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub enabled: bool,
    pub bind_address: String,
    pub protocol: String,
    /// 为空时数据集只保存在内存中，也不会写日志
    pub work_dir: String,
    /// 开启后所有状态变更先写日志再生效，重启时重放
    pub fault_tolerant_mode: bool,
    pub job_gc_check_interval_ms: u64,
    /// 作业最后一个客户端释放后，经过该时长才会被回收
    pub job_gc_timeout_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:5050".to_string(),
            protocol: "http".to_string(),
            work_dir: String::new(),
            fault_tolerant_mode: false,
            job_gc_check_interval_ms: 10 * 60 * 1000,
            job_gc_timeout_ms: 5 * 60 * 1000,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_address.is_empty() {
            return Err(anyhow::anyhow!("Dispatcher监听地址不能为空"));
        }

        validate_protocol(&self.protocol)?;

        if self.job_gc_check_interval_ms == 0 {
            return Err(anyhow::anyhow!("作业回收检查间隔必须大于0"));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub bind_address: String,
    /// 对外公布的地址，为空时启动阶段根据主机名和监听端口推导
    pub worker_address: String,
    pub dispatcher_address: String,
    pub protocol: String,
    pub heartbeat_interval_ms: u64,
    pub dispatcher_timeout_ms: u64,
    /// 注册和上报失败后的重试间隔
    pub retry_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "0.0.0.0:5051".to_string(),
            worker_address: String::new(),
            dispatcher_address: "127.0.0.1:5050".to_string(),
            protocol: "http".to_string(),
            heartbeat_interval_ms: 30 * 1000,
            dispatcher_timeout_ms: 60 * 1000,
            retry_interval_ms: 5 * 1000,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_address.is_empty() {
            return Err(anyhow::anyhow!("Worker监听地址不能为空"));
        }

        if self.dispatcher_address.is_empty() {
            return Err(anyhow::anyhow!("Dispatcher地址不能为空"));
        }

        validate_protocol(&self.protocol)?;

        if self.heartbeat_interval_ms == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }

        if self.dispatcher_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Dispatcher请求超时必须大于0"));
        }

        if self.retry_interval_ms == 0 {
            return Err(anyhow::anyhow!("重试间隔必须大于0"));
        }

        Ok(())
    }
}

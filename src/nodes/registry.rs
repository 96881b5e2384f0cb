use std::collections::HashMap;
use std::sync::Arc;

use super::NodeExecutor;

/// 节点注册表 - 管理所有节点类型的执行器
///
/// 进程启动时填充一次,之后只读。
pub struct NodeRegistry {
    executors: HashMap<String, Arc<dyn NodeExecutor>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        NodeRegistry {
            executors: HashMap::new(),
        }
    }

    /// 注册节点执行器
    pub fn register(&mut self, node_type: &str, executor: Arc<dyn NodeExecutor>) {
        self.executors.insert(node_type.to_string(), executor);
    }

    /// 获取节点执行器
    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(node_type).cloned()
    }

    /// 获取所有已注册的节点类型
    pub fn registered_types(&self) -> Vec<String> {
        self.executors.keys().cloned().collect()
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// 创建并初始化默认的节点注册表
pub fn create_default_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();

    // 控制流节点
    registry.register("start", Arc::new(super::control_flow::StartNode));
    registry.register("end", Arc::new(super::control_flow::EndNode));
    registry.register("condition", Arc::new(super::control_flow::ConditionNode));
    registry.register("switch", Arc::new(super::control_flow::SwitchNode));
    registry.register("continue", Arc::new(super::control_flow::ContinueNode));
    registry.register("delay", Arc::new(super::control_flow::DelayNode));

    // 数据转换节点
    registry.register("transform", Arc::new(super::data_transform::TransformNode));
    registry.register("function", Arc::new(super::data_transform::FunctionNode));
    registry.register("log", Arc::new(super::data_transform::LogNode));

    // HTTP
    registry.register("http_request", Arc::new(super::http::HttpRequestNode::new()));
    registry.register("http_in", Arc::new(super::http::HttpInNode));
    registry.register("http_out", Arc::new(super::http::HttpOutNode));
    registry.register("graphql", Arc::new(super::http::GraphqlNode::new()));

    // 外部系统
    registry.register("redis", Arc::new(super::redis::RedisNode));
    registry.register("redis_subscribe", Arc::new(super::redis::RedisSubscribeNode));
    registry.register("email", Arc::new(super::email::EmailNode));
    registry.register("email_receive", Arc::new(super::email::EmailReceiveNode));
    registry.register("database", Arc::new(super::database::DatabaseNode));
    registry.register("ssh", Arc::new(super::ssh::SshNode));

    // 本地系统
    registry.register("read_file", Arc::new(super::fs::ReadFileNode));
    registry.register("write_file", Arc::new(super::fs::WriteFileNode));
    registry.register("exec", Arc::new(super::exec::ExecNode));

    // 工作流组合
    registry.register("cron", Arc::new(super::cron::CronNode));
    registry.register("flow", Arc::new(super::subflow::FlowNode));
    registry.register("get_config_store", Arc::new(super::config_store::GetConfigStoreNode));
    registry.register("set_config_store", Arc::new(super::config_store::SetConfigStoreNode));

    registry
}

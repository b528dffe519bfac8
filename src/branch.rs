//! 分支管理器（C8）：通道 id 的层级命名空间与通配符发现（spec §4.8）。
//!
//! # 设计背景（Why）
//! - 分支路径沿用 `/` 分隔，完整通道 id 为 `branch.path + '/' + localId`（根分支
//!   退化为裸 `localId`），与 `spark-core::ids` 给字符串 id 包一层薄新类型的手法
//!   一脉相承，但分支需要额外维护父子关系与模式匹配，因此单独建模而非复用
//!   [`crate::common::ChannelId`] 的构造逻辑。
//! - `*`/`**` 通配符匹配只用于发现/批量操作；显式 `call` 绝不接受模式（spec
//!   §4.8 "`call` with a pattern is forbidden"），这个约束在类型层面通过
//!   `Branch::call` 只接受具体 id、`bulk_call` 单独要求模式 + `force`/`dry_run`
//!   来体现，而不是在运行时用字符串嗅探。

use std::sync::{Arc, Mutex};

use crate::{
    common::{ChannelId, Payload},
    dispatch::Response,
    error::CyreErrorKind,
};

/// 创建分支的参数（spec §4.8 `createBranch({id, pathSegment?, parent?, maxDepth?})`）。
#[derive(Clone, Debug, Default)]
pub struct CreateBranchOptions {
    pub id: Option<String>,
    pub path_segment: Option<String>,
    pub parent: Option<String>,
    pub max_depth: Option<usize>,
}

/// 批量调用的安全阀（spec §4.8 "`bulkCall` requiring a `force` or `dryRun` flag"）。
#[derive(Clone, Copy, Debug)]
pub struct BulkCallOptions {
    pub force: bool,
    pub dry_run: bool,
    pub max_channels: usize,
}

#[derive(Debug)]
struct BranchNode {
    path: String,
    parent: Option<String>,
    max_depth: usize,
    children: Vec<String>,
}

/// 分支命名空间索引：路径字符串 -> 节点元数据。
///
/// 用一把 `std::sync::Mutex` 而非 `DashMap`：分支的创建/发现频率远低于
/// `call()` 热路径，教案式地沿用最简单、足够的并发原语即可，不必为低频路径
/// 引入与 [`crate::channel::registry::ChannelRegistry`] 相同的分片结构。
pub struct BranchManager {
    nodes: Mutex<std::collections::HashMap<String, BranchNode>>,
    default_max_depth: usize,
}

impl BranchManager {
    pub fn new() -> Self {
        Self::with_default_max_depth(32)
    }

    pub fn with_default_max_depth(default_max_depth: usize) -> Self {
        let mut nodes = std::collections::HashMap::new();
        nodes.insert(
            String::new(),
            BranchNode {
                path: String::new(),
                parent: None,
                max_depth: default_max_depth,
                children: Vec::new(),
            },
        );
        Self {
            nodes: Mutex::new(nodes),
            default_max_depth,
        }
    }

    /// 注册一个分支，返回其完整路径。
    pub fn create_branch(&self, opts: CreateBranchOptions) -> Result<String, CyreErrorKind> {
        let parent_path = opts.parent.unwrap_or_default();
        let segment = opts
            .path_segment
            .or(opts.id)
            .ok_or_else(|| CyreErrorKind::InvalidConfig {
                id: String::new(),
                reason: "createBranch requires an id or pathSegment".into(),
            })?;
        if segment.contains('/') || segment.contains('*') {
            return Err(CyreErrorKind::InvalidConfig {
                id: segment,
                reason: "branch path segments must not contain '/' or '*'".into(),
            });
        }

        let mut nodes = self.nodes.lock().expect("branch registry poisoned");
        let parent_depth = nodes
            .get(&parent_path)
            .ok_or_else(|| CyreErrorKind::InvalidConfig {
                id: parent_path.clone(),
                reason: "parent branch does not exist".into(),
            })?
            .max_depth;
        let depth_budget = opts.max_depth.unwrap_or(parent_depth);
        if depth_budget == 0 {
            return Err(CyreErrorKind::InvalidConfig {
                id: segment,
                reason: "branch nesting exceeds maxDepth".into(),
            });
        }

        let full_path = if parent_path.is_empty() {
            segment.clone()
        } else {
            format!("{parent_path}/{segment}")
        };
        if nodes.contains_key(&full_path) {
            return Err(CyreErrorKind::InvalidConfig {
                id: full_path,
                reason: "branch already exists".into(),
            });
        }
        nodes.insert(
            full_path.clone(),
            BranchNode {
                path: full_path.clone(),
                parent: Some(parent_path.clone()),
                max_depth: depth_budget - 1,
                children: Vec::new(),
            },
        );
        if let Some(parent) = nodes.get_mut(&parent_path) {
            parent.children.push(full_path.clone());
        }
        Ok(full_path)
    }

    /// 分支限定后的完整通道 id：根分支退化为裸 `local_id`。
    pub fn qualify(&self, branch_path: &str, local_id: &str) -> ChannelId {
        if branch_path.is_empty() {
            ChannelId::new(local_id.to_string())
        } else {
            ChannelId::new(format!("{branch_path}/{local_id}"))
        }
    }

    pub fn exists(&self, branch_path: &str) -> bool {
        self.nodes
            .lock()
            .expect("branch registry poisoned")
            .contains_key(branch_path)
    }

    pub fn default_max_depth(&self) -> usize {
        self.default_max_depth
    }
}

impl Default for BranchManager {
    fn default() -> Self {
        Self::new()
    }
}

/// `*`（单段）/`**`（任意深度）通配符匹配（spec §4.8）。
pub fn matches_pattern(id: &str, pattern: &str) -> bool {
    let id_segments: Vec<&str> = id.split('/').collect();
    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    matches_segments(&id_segments, &pattern_segments)
}

fn matches_segments(id: &[&str], pattern: &[&str]) -> bool {
    match pattern.first() {
        None => id.is_empty(),
        Some(&"**") => {
            if pattern.len() == 1 {
                return true;
            }
            (0..=id.len()).any(|split| matches_segments(&id[split..], &pattern[1..]))
        }
        Some(&"*") => !id.is_empty() && matches_segments(&id[1..], &pattern[1..]),
        Some(seg) => id.first() == Some(seg) && matches_segments(&id[1..], &pattern[1..]),
    }
}

/// 分支句柄：把 `action`/`on`/`call`/`forget` 自动限定到该分支的路径下。
///
/// 持有对顶层 [`crate::runtime::Cyre`] 核心操作的引用，本身不复制任何状态——
/// 与 teacher 代码里“句柄类型围着 `Arc` 共享状态”的模式一致。
pub struct Branch {
    pub(crate) path: String,
    pub(crate) manager: Arc<BranchManager>,
    pub(crate) call: Arc<dyn Fn(&ChannelId, Option<Payload>) -> crate::future::BoxFuture<'static, Response> + Send + Sync>,
    pub(crate) forget: Arc<dyn Fn(&ChannelId) -> bool + Send + Sync>,
    pub(crate) discover: Arc<dyn Fn() -> Vec<ChannelId> + Send + Sync>,
}

impl Branch {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn qualify(&self, local_id: &str) -> ChannelId {
        self.manager.qualify(&self.path, local_id)
    }

    /// 显式单通道调用；拒绝任何看起来像通配符模式的 id（spec §4.8）。
    pub async fn call(&self, local_id: &str, payload: Option<Payload>) -> Response {
        if local_id.contains('*') {
            return forbidden_pattern_response(local_id);
        }
        let id = self.qualify(local_id);
        (self.call)(&id, payload).await
    }

    pub fn forget(&self, local_id: &str) -> bool {
        let id = self.qualify(local_id);
        (self.forget)(&id)
    }

    /// 批量调用，要求显式的 `force`/`dryRun` 与 `maxChannels` 上限（spec §4.8）。
    pub async fn bulk_call(
        &self,
        pattern: &str,
        payload: Option<Payload>,
        opts: BulkCallOptions,
    ) -> Result<Vec<(ChannelId, Response)>, CyreErrorKind> {
        if !opts.force && !opts.dry_run {
            return Err(CyreErrorKind::InvalidConfig {
                id: pattern.to_string(),
                reason: "bulkCall requires force or dryRun".into(),
            });
        }
        let full_pattern = if self.path.is_empty() {
            pattern.to_string()
        } else {
            format!("{}/{}", self.path, pattern)
        };
        let matches: Vec<ChannelId> = (self.discover)()
            .into_iter()
            .filter(|id| matches_pattern(id.as_str(), &full_pattern))
            .take(opts.max_channels)
            .collect();

        if opts.dry_run {
            return Ok(matches
                .into_iter()
                .map(|id| {
                    (
                        id,
                        Response {
                            ok: true,
                            payload: None,
                            message: Some("dryRun: not executed".into()),
                            error: None,
                            metadata: Default::default(),
                        },
                    )
                })
                .collect());
        }

        let mut results = Vec::with_capacity(matches.len());
        for id in matches {
            let response = (self.call)(&id, payload.clone()).await;
            results.push((id, response));
        }
        Ok(results)
    }
}

fn forbidden_pattern_response(pattern: &str) -> Response {
    let kind = CyreErrorKind::InvalidConfig {
        id: pattern.to_string(),
        reason: "call() does not accept wildcard patterns; use bulkCall".into(),
    };
    Response {
        ok: false,
        payload: None,
        message: Some(kind.to_string()),
        error: Some(kind.to_string()),
        metadata: crate::dispatch::ResponseMetadata {
            error_kind: Some(kind.code()),
            ..Default::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_segment_wildcard_matches_exactly_one_level() {
        assert!(matches_pattern("sensors/temp", "sensors/*"));
        assert!(!matches_pattern("sensors/a/b", "sensors/*"));
    }

    #[test]
    fn double_star_matches_any_depth_including_zero() {
        assert!(matches_pattern("sensors", "sensors/**"));
        assert!(matches_pattern("sensors/a/b/c", "sensors/**"));
    }

    #[test]
    fn create_branch_qualifies_child_ids_with_path() {
        let manager = BranchManager::new();
        let path = manager
            .create_branch(CreateBranchOptions {
                id: Some("sensors".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(path, "sensors");
        let id = manager.qualify(&path, "temp");
        assert_eq!(id.as_str(), "sensors/temp");
    }

    #[test]
    fn nested_branch_exhausting_max_depth_is_rejected() {
        let manager = BranchManager::with_default_max_depth(1);
        let first = manager
            .create_branch(CreateBranchOptions {
                id: Some("a".into()),
                ..Default::default()
            })
            .unwrap();
        let nested = manager.create_branch(CreateBranchOptions {
            id: Some("b".into()),
            parent: Some(first),
            ..Default::default()
        });
        assert!(nested.is_err());
    }
}

//! 管线编译器（C6）：把通道配置编译成固定顺序的天赋阶段计划 + 快速路径标记。
//!
//! # 设计背景（Why）
//! - spec §4.2 规定天赋执行顺序由引擎固定，与声明顺序无关：
//!   `required -> schema -> selector -> condition -> transform -> detectChanges`；
//!   保护（throttle/debounce/buffer）包裹在天赋链之外，先于其执行。
//! - 编译在注册时一次性完成（而不是每次 `call()` 都重新判断有哪些天赋），这样热路径
//!   只需要遍历一个已经去掉空洞的阶段列表，不需要任何 `if talent.is_some()` 的运行时
//!   分支——呼应 spec 原文 "no null-checks at runtime"。

use crate::channel::ChannelConfig;

/// 天赋管线中的单个阶段标签，顺序即执行顺序。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StageTag {
    Required,
    Schema,
    Selector,
    Condition,
    Transform,
    DetectChanges,
}

/// 编译产物：固定顺序的阶段列表 + 分类标记，供诊断与快速路径判断使用。
#[derive(Clone)]
pub struct CompiledPipeline {
    pub stages: Vec<StageTag>,
    pub has_fast_path: bool,
    pub has_protections: bool,
    pub has_processing: bool,
    pub verification_hash: String,
}

impl CompiledPipeline {
    /// 编译通道配置。快速路径要求：无天赋、无保护、无调度（§4.2）。
    pub fn compile(config: &ChannelConfig) -> Self {
        let mut stages = Vec::with_capacity(6);
        if config.talents.required.is_some() {
            stages.push(StageTag::Required);
        }
        if config.talents.schema.is_some() {
            stages.push(StageTag::Schema);
        }
        if config.talents.selector.is_some() {
            stages.push(StageTag::Selector);
        }
        if config.talents.condition.is_some() {
            stages.push(StageTag::Condition);
        }
        if config.talents.transform.is_some() {
            stages.push(StageTag::Transform);
        }
        if config.talents.detect_changes {
            stages.push(StageTag::DetectChanges);
        }

        let has_processing = !stages.is_empty();
        let has_protections = !matches!(config.protection, crate::channel::Protection::None);
        let has_scheduling =
            config.scheduling.delay.is_some() || config.scheduling.interval.is_some();
        let has_fast_path = !has_processing && !has_protections && !has_scheduling;

        Self {
            stages,
            has_fast_path,
            has_protections,
            has_processing,
            verification_hash: config.verification_hash(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelConfig;
    use std::sync::Arc;

    #[test]
    fn empty_config_compiles_to_fast_path() {
        let config = ChannelConfig::new("fast");
        let compiled = CompiledPipeline::compile(&config);
        assert!(compiled.has_fast_path);
        assert!(compiled.stages.is_empty());
    }

    #[test]
    fn talent_order_is_fixed_regardless_of_declaration_order() {
        let mut config = ChannelConfig::new("ordered");
        // Declare transform first, required last: the compiled order must not follow this.
        config.talents.transform = Some(Arc::new(|p| p));
        config.talents.detect_changes = true;
        config.talents.condition = Some(Arc::new(|_| true));
        config.talents.selector = Some(Arc::new(|p| p.clone()));
        config.talents.schema = Some(Arc::new(|p| crate::channel::SchemaOutcome::Ok { data: p.clone() }));
        config.talents.required = Some(crate::channel::RequiredMode::Standard);

        let compiled = CompiledPipeline::compile(&config);
        assert_eq!(
            compiled.stages,
            vec![
                StageTag::Required,
                StageTag::Schema,
                StageTag::Selector,
                StageTag::Condition,
                StageTag::Transform,
                StageTag::DetectChanges,
            ]
        );
        assert!(!compiled.has_fast_path);
        assert!(compiled.has_processing);
    }

    #[test]
    fn reregistering_identical_config_shape_yields_same_hash() {
        let a = ChannelConfig::new("same").throttle(std::time::Duration::from_millis(50));
        let b = ChannelConfig::new("same").throttle(std::time::Duration::from_millis(50));
        assert_eq!(a.verification_hash(), b.verification_hash());

        let c = ChannelConfig::new("same").throttle(std::time::Duration::from_millis(51));
        assert_ne!(a.verification_hash(), c.verification_hash());
    }
}

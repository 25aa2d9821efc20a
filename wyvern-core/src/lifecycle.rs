use std::any::Any;

use crate::bean::{BeanDefinition, BeanRef};

/// Bean 后置处理器 trait
/// 类似 Spring 的 BeanPostProcessor，在每个 Bean 初始化前后调用
///
/// 多个处理器按 `order()` 从小到大执行。返回错误会中止该 Bean 的创建。
pub trait BeanPostProcessor: Send + Sync {
    /// 注入完成后、post-construct 之前调用，可以修改实例
    fn post_process_before_initialization(
        &self,
        bean: &mut (dyn Any + Send + Sync),
        definition: &BeanDefinition,
    ) -> anyhow::Result<()> {
        let _ = (bean, definition);
        Ok(())
    }

    /// post-construct 与代理之后调用，拿到的是对外可见的实例
    fn post_process_after_initialization(
        &self,
        bean: &BeanRef,
        definition: &BeanDefinition,
    ) -> anyhow::Result<()> {
        let _ = (bean, definition);
        Ok(())
    }

    /// 执行顺序，越小越先执行
    fn order(&self) -> i32 {
        1000
    }
}

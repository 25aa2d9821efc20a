//! 内置拦截器

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error_info::ErrorInfo;
use crate::interceptor::MethodInterceptor;
use crate::invocation::{MethodInvocationContext, ReturnValue};

/// 日志拦截器默认的绑定名称
pub const TRACED: &str = "Traced";

/// 计时拦截器默认的绑定名称
pub const TIMED: &str = "Timed";

/// 日志拦截器：记录方法进入、返回与失败
pub struct TracingInterceptor {
    log_args: bool,
    order: i32,
}

impl TracingInterceptor {
    pub fn new() -> Self {
        Self {
            log_args: false,
            order: -100,
        }
    }

    /// 进入时记录参数名称
    pub fn with_args(mut self) -> Self {
        self.log_args = true;
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

impl Default for TracingInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodInterceptor for TracingInterceptor {
    fn intercept(&self, context: &mut MethodInvocationContext<'_>) -> anyhow::Result<ReturnValue> {
        let signature = context.method().signature();
        if self.log_args {
            tracing::info!("→ Entering: {} with {:?}", signature, context.parameters());
        } else {
            tracing::info!("→ Entering: {}", signature);
        }

        let started = Instant::now();
        let result = context.proceed();
        match &result {
            Ok(_) => tracing::info!("← Exiting: {} (took {:?})", signature, started.elapsed()),
            Err(e) => tracing::error!(
                "✗ Exception in {}: {}",
                signature,
                ErrorInfo::from_anyhow(e).full_description()
            ),
        }
        result
    }

    fn order(&self) -> i32 {
        self.order
    }

    fn name(&self) -> &str {
        "TracingInterceptor"
    }
}

/// 单个方法的耗时统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MethodTimings {
    pub calls: u64,
    pub failures: u64,
    pub total: Duration,
    pub max: Duration,
}

impl MethodTimings {
    pub fn average(&self) -> Duration {
        if self.calls == 0 {
            Duration::ZERO
        } else {
            self.total / self.calls as u32
        }
    }
}

/// 计时拦截器：按方法签名累计耗时，超过阈值时告警
pub struct TimingInterceptor {
    threshold: Duration,
    order: i32,
    timings: Mutex<HashMap<String, MethodTimings>>,
}

impl TimingInterceptor {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            order: -50,
            timings: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// 取得 `Type.method` 的统计
    pub fn timings(&self, signature: &str) -> Option<MethodTimings> {
        self.timings.lock().get(signature).copied()
    }

    pub fn reset(&self) {
        self.timings.lock().clear();
    }
}

impl MethodInterceptor for TimingInterceptor {
    fn intercept(&self, context: &mut MethodInvocationContext<'_>) -> anyhow::Result<ReturnValue> {
        let started = Instant::now();
        let result = context.proceed();
        let elapsed = started.elapsed();
        let signature = context.method().signature();

        if elapsed > self.threshold {
            tracing::warn!(
                "⚠️ Slow method detected: {} took {:?} (threshold: {:?})",
                signature,
                elapsed,
                self.threshold
            );
        }

        let mut timings = self.timings.lock();
        let entry = timings.entry(signature).or_default();
        entry.calls += 1;
        if result.is_err() {
            entry.failures += 1;
        }
        entry.total += elapsed;
        entry.max = entry.max.max(elapsed);
        result
    }

    fn order(&self) -> i32 {
        self.order
    }

    fn name(&self) -> &str {
        "TimingInterceptor"
    }
}

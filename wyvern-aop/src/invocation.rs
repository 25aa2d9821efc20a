//! 方法调用上下文
//!
//! 每次经过代理的调用都会创建一个 `MethodInvocationContext`，拦截器通过它
//! 读取、替换参数，并用 `proceed()` 把调用交给链上的下一个拦截器或目标方法。

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use wyvern_core::{AnnotationMetadata, AnnotationValue, BeanRef};

use crate::error::InterceptionError;
use crate::interceptor::MethodInterceptor;

/// 类型擦除的参数值
pub type Value = Box<dyn Any + Send + Sync>;

/// 类型擦除的返回值，代理负责把它还原为方法声明的类型
pub type ReturnValue = Box<dyn Any + Send + Sync>;

/// 目标方法的调用入口：拿到目标实例和参数，返回擦除后的结果
pub(crate) type TargetFn<'f> = dyn Fn(&BeanRef, &ParameterValues) -> anyhow::Result<ReturnValue> + 'f;

/// 可执行方法的元数据
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutableMethod {
    declaring_type: String,
    name: String,
    parameters: Vec<String>,
    annotations: AnnotationMetadata,
}

impl ExecutableMethod {
    pub fn new(declaring_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            declaring_type: declaring_type.into(),
            name: name.into(),
            parameters: Vec::new(),
            annotations: AnnotationMetadata::new(),
        }
    }

    /// 声明参数名称
    pub fn parameters(mut self, names: &[&str]) -> Self {
        self.parameters = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// 方法级注解，同名的拦截器绑定会作用在此方法上
    pub fn annotate(mut self, annotation: AnnotationValue) -> Self {
        self.annotations.add(annotation);
        self
    }

    pub fn declaring_type(&self) -> &str {
        &self.declaring_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameter_names(&self) -> &[String] {
        &self.parameters
    }

    pub fn annotations(&self) -> &AnnotationMetadata {
        &self.annotations
    }

    /// `Type.method` 形式的签名
    pub fn signature(&self) -> String {
        format!("{}.{}", self.declaring_type, self.name)
    }
}

impl fmt::Display for ExecutableMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.signature(), self.parameters.join(", "))
    }
}

/// 按声明顺序保存的参数值
#[derive(Default)]
pub struct ParameterValues {
    values: Vec<(String, Value)>,
}

impl ParameterValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置参数；同名参数会被替换
    pub fn insert<V: Send + Sync + 'static>(&mut self, name: impl Into<String>, value: V) {
        let name = name.into();
        let value: Value = Box::new(value);
        match self.values.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.values.push((name, value)),
        }
    }

    pub fn with<V: Send + Sync + 'static>(mut self, name: impl Into<String>, value: V) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get<V: 'static>(&self, name: &str) -> Option<&V> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.downcast_ref::<V>())
    }

    pub fn get_mut<V: 'static>(&mut self, name: &str) -> Option<&mut V> {
        self.values
            .iter_mut()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.downcast_mut::<V>())
    }

    /// 取得参数引用，缺失或类型不符时报错
    pub fn value<V: 'static>(&self, name: &str) -> anyhow::Result<&V> {
        let (_, value) = self
            .values
            .iter()
            .find(|(n, _)| n == name)
            .ok_or_else(|| InterceptionError::UnknownParameter { name: name.to_string() })?;
        value.downcast_ref::<V>().ok_or_else(|| {
            InterceptionError::ParameterType {
                name: name.to_string(),
                expected: std::any::type_name::<V>(),
            }
            .into()
        })
    }

    /// 取得参数的拷贝，目标方法可以被多次调用
    pub fn cloned<V: Clone + 'static>(&self, name: &str) -> anyhow::Result<V> {
        self.value::<V>(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.iter().any(|(n, _)| n == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.values.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for ParameterValues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

/// 构造 `ParameterValues`
///
/// ```rust,ignore
/// let parameters = params!["id" => 42u64, "note" => String::from("gift")];
/// ```
#[macro_export]
macro_rules! params {
    () => {
        $crate::ParameterValues::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut values = $crate::ParameterValues::new();
        $(values.insert($name, $value);)+
        values
    }};
}

/// 一次方法调用的拦截上下文
pub struct MethodInvocationContext<'a> {
    bean_name: &'a str,
    method: &'a ExecutableMethod,
    target: Option<BeanRef>,
    parameters: ParameterValues,
    interceptors: &'a [Arc<dyn MethodInterceptor>],
    index: usize,
    invoker: Option<&'a TargetFn<'a>>,
}

impl<'a> MethodInvocationContext<'a> {
    pub(crate) fn new(
        bean_name: &'a str,
        method: &'a ExecutableMethod,
        target: Option<BeanRef>,
        parameters: ParameterValues,
        interceptors: &'a [Arc<dyn MethodInterceptor>],
        invoker: Option<&'a TargetFn<'a>>,
    ) -> Self {
        Self {
            bean_name,
            method,
            target,
            parameters,
            interceptors,
            index: 0,
            invoker,
        }
    }

    /// 被代理的 Bean 名称
    pub fn bean_name(&self) -> &str {
        self.bean_name
    }

    pub fn method(&self) -> &ExecutableMethod {
        self.method
    }

    /// 当前目标；引介调用没有目标
    pub fn target(&self) -> Option<&BeanRef> {
        self.target.as_ref()
    }

    pub fn target_as<T: 'static>(&self) -> Option<&T> {
        self.target.as_ref().and_then(|t| (**t).downcast_ref::<T>())
    }

    pub fn is_introduction(&self) -> bool {
        self.target.is_none()
    }

    pub fn parameters(&self) -> &ParameterValues {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut ParameterValues {
        &mut self.parameters
    }

    pub fn parameter<V: 'static>(&self, name: &str) -> Option<&V> {
        self.parameters.get(name)
    }

    /// 替换已声明的参数，后续拦截器和目标看到的是新值
    pub fn set_parameter<V: Send + Sync + 'static>(&mut self, name: &str, value: V) -> anyhow::Result<()> {
        if !self.parameters.contains(name) {
            return Err(InterceptionError::UnknownParameter { name: name.to_string() }.into());
        }
        self.parameters.insert(name, value);
        Ok(())
    }

    /// 调用链上的下一个拦截器，链尾调用目标方法
    ///
    /// 返回后链的位置会复原，同一个拦截器可以多次调用 `proceed()`。
    pub fn proceed(&mut self) -> anyhow::Result<ReturnValue> {
        let interceptors = self.interceptors;
        match interceptors.get(self.index) {
            Some(interceptor) => {
                tracing::trace!(
                    "Invoking interceptor '{}' for {}",
                    interceptor.name(),
                    self.method.signature()
                );
                self.index += 1;
                let result = interceptor.intercept(self);
                self.index -= 1;
                result
            }
            None => self.invoke_target(),
        }
    }

    /// 以另一个实例作为目标继续调用，返回后恢复原目标
    pub fn proceed_with(&mut self, target: BeanRef) -> anyhow::Result<ReturnValue> {
        let previous = self.target.replace(target);
        let result = self.proceed();
        self.target = previous;
        result
    }

    fn invoke_target(&self) -> anyhow::Result<ReturnValue> {
        match (&self.target, self.invoker) {
            (Some(target), Some(invoker)) => invoker(target, &self.parameters),
            _ => Err(InterceptionError::UnhandledIntroduction {
                bean: self.bean_name.to_string(),
                method: self.method.name().to_string(),
            }
            .into()),
        }
    }
}

impl fmt::Debug for MethodInvocationContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodInvocationContext")
            .field("bean", &self.bean_name)
            .field("method", &self.method.signature())
            .field("parameters", &self.parameters)
            .field("position", &self.index)
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_macro_keeps_declaration_order() {
        let mut parameters = crate::params!["id" => 7u64, "note" => String::from("gift")];
        assert_eq!(parameters.names().collect::<Vec<_>>(), vec!["id", "note"]);
        assert_eq!(parameters.get::<u64>("id"), Some(&7));

        parameters.insert("id", 9u64);
        assert_eq!(parameters.len(), 2);
        assert_eq!(parameters.cloned::<u64>("id").unwrap(), 9);
        *parameters.get_mut::<String>("note").unwrap() = "wrapped".to_string();
        assert_eq!(parameters.value::<String>("note").unwrap(), "wrapped");
    }

    #[test]
    fn test_value_reports_missing_and_mistyped() {
        let parameters = ParameterValues::new().with("id", 1u32);

        let missing = parameters.value::<u32>("name").unwrap_err();
        assert!(matches!(
            missing.downcast_ref::<InterceptionError>(),
            Some(InterceptionError::UnknownParameter { .. })
        ));
        let mistyped = parameters.value::<String>("id").unwrap_err();
        assert!(mistyped.to_string().contains("String"));
        assert!(crate::params![].is_empty());
    }

    #[test]
    fn test_executable_method_signature() {
        let method = ExecutableMethod::new("OrderService", "place")
            .parameters(&["id", "quantity"])
            .annotate(AnnotationValue::new("Timed"));
        assert_eq!(method.signature(), "OrderService.place");
        assert_eq!(method.to_string(), "OrderService.place(id, quantity)");
        assert!(method.annotations().has("Timed"));
    }

    #[test]
    fn test_target_is_invoked_at_end_of_empty_chain() {
        let method = ExecutableMethod::new("Counter", "add").parameters(&["n"]);
        let target: BeanRef = Arc::new(40u32);
        let invoker = |bean: &BeanRef, parameters: &ParameterValues| -> anyhow::Result<ReturnValue> {
            let base = (**bean).downcast_ref::<u32>().copied().unwrap_or_default();
            Ok(Box::new(base + parameters.cloned::<u32>("n")?))
        };
        let mut context = MethodInvocationContext::new(
            "counter",
            &method,
            Some(target),
            ParameterValues::new().with("n", 2u32),
            &[],
            Some(&invoker),
        );

        let result = context.proceed().unwrap();
        assert_eq!(result.downcast_ref::<u32>(), Some(&42));
        assert!(context.set_parameter("missing", 1u32).is_err());

        let other: BeanRef = Arc::new(100u32);
        let result = context.proceed_with(other).unwrap();
        assert_eq!(result.downcast_ref::<u32>(), Some(&102));
        assert_eq!(context.target_as::<u32>(), Some(&40));
    }
}

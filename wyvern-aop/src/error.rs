//! 拦截相关的错误类型
//!
//! 拦截器和目标方法自身的错误以 `anyhow::Error` 原样向上传播，
//! 这里只定义调用管线本身产生的错误。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InterceptionError {
    /// 引介方法没有拦截器给出结果
    #[error("Unhandled introduction method '{method}' of bean '{bean}': no interceptor produced a result")]
    UnhandledIntroduction { bean: String, method: String },

    /// 代理没有声明此方法
    #[error("Method '{method}' is not declared by the proxy of bean '{bean}'")]
    UnknownMethod { bean: String, method: String },

    /// 参数不存在
    #[error("No parameter named '{name}'")]
    UnknownParameter { name: String },

    /// 参数类型不符
    #[error("Parameter '{name}' is not of type [{expected}]")]
    ParameterType { name: String, expected: &'static str },

    /// 拦截器返回值与方法声明的返回类型不符
    #[error("Return value of method '{method}' is not of type [{expected}]")]
    ReturnType { method: String, expected: &'static str },

    /// `proceed_with` 传入的实例不是目标类型
    #[error("Target of method '{method}' is not of type [{expected}]")]
    TargetType { method: String, expected: &'static str },
}

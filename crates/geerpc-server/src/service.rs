use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use geerpc_common::{CodecType, Result, RpcError};

/// Type-erased method handler. Produced by the typed wrapper in
/// [`Service::method`]: decode the argument with the connection's codec,
/// run the user function against a freshly defaulted reply, encode the
/// reply back.
type BoxedMethod = Arc<dyn Fn(CodecType, Vec<u8>) -> Result<Vec<u8>> + Send + Sync>;

/// A single registered method: its handler plus a call counter.
pub struct MethodType {
    handler: BoxedMethod,
    num_calls: AtomicU64,
}

impl std::fmt::Debug for MethodType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodType")
            .field("num_calls", &self.num_calls)
            .finish()
    }
}

impl MethodType {
    fn new<Arg, Reply, F>(f: F) -> Self
    where
        Arg: DeserializeOwned + Send + 'static,
        Reply: Serialize + Default + Send + 'static,
        F: Fn(Arg, &mut Reply) -> Result<()> + Send + Sync + 'static,
    {
        let handler: BoxedMethod = Arc::new(move |codec, arg_bytes| {
            let arg: Arg = codec.decode(&arg_bytes)?;
            let mut reply = Reply::default();
            f(arg, &mut reply)?;
            codec.encode(&reply)
        });
        MethodType {
            handler,
            num_calls: AtomicU64::new(0),
        }
    }

    /// How many times this method has been invoked.
    pub fn num_calls(&self) -> u64 {
        self.num_calls.load(Ordering::Relaxed)
    }

    /// Invokes the method with the encoded argument, returning the encoded
    /// reply.
    ///
    /// User methods are synchronous, so the invocation runs on the blocking
    /// pool and never stalls the reactor. A panicking method is recovered
    /// here and reported as a [`RpcError::Handler`]; the caller turns it
    /// into the response header's error text.
    pub async fn call(&self, codec: CodecType, arg_bytes: Vec<u8>) -> Result<Vec<u8>> {
        self.num_calls.fetch_add(1, Ordering::Relaxed);
        let handler = Arc::clone(&self.handler);
        match tokio::task::spawn_blocking(move || handler(codec, arg_bytes)).await {
            Ok(result) => result,
            Err(err) if err.is_panic() => {
                let panic = err.into_panic();
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(RpcError::Handler(format!("rpc server: method panicked: {msg}")))
            }
            Err(err) => Err(RpcError::Handler(err.to_string())),
        }
    }
}

/// A named bundle of methods, registered on a [`Server`](crate::Server)
/// under `name` and addressed as `"Name.Method"`.
///
/// The method map is fixed once the service is registered; `Service` is a
/// builder up to that point.
///
/// # Example
///
/// ```
/// use geerpc_server::Service;
///
/// let svc = Service::new("Counter")
///     .unwrap()
///     .method("Add", |n: u64, total: &mut u64| {
///         *total = n + 1;
///         Ok(())
///     });
/// assert!(svc.get_method("Add").is_some());
/// ```
pub struct Service {
    name: String,
    methods: HashMap<String, Arc<MethodType>>,
}

impl Service {
    /// Creates an empty service. The name must be exported (leading ASCII
    /// uppercase) or registration fails outright.
    pub fn new(name: impl Into<String>) -> Result<Service> {
        let name = name.into();
        if !is_exported(&name) {
            return Err(RpcError::InvalidServiceName(name));
        }
        Ok(Service {
            name,
            methods: HashMap::new(),
        })
    }

    /// Admits a method under `name`.
    ///
    /// The admissible shape is fixed by the signature: one deserializable
    /// argument, one mutable reply container manufactured via `Default`
    /// (maps and sequences start out empty), an error result that becomes
    /// the response header's error text. A method whose name is not
    /// exported is skipped, not an error.
    pub fn method<Arg, Reply, F>(mut self, name: &str, f: F) -> Self
    where
        Arg: DeserializeOwned + Send + 'static,
        Reply: Serialize + Default + Send + 'static,
        F: Fn(Arg, &mut Reply) -> Result<()> + Send + Sync + 'static,
    {
        if !is_exported(name) {
            warn!(service = %self.name, method = name, "skipping method: name is not exported");
            return self;
        }
        debug!("rpc server: register {}.{}", self.name, name);
        self.methods.insert(name.to_string(), Arc::new(MethodType::new(f)));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get_method(&self, name: &str) -> Option<Arc<MethodType>> {
        self.methods.get(name).cloned()
    }
}

fn is_exported(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;

    #[derive(Serialize, Deserialize)]
    struct Args {
        num1: i32,
        num2: i32,
    }

    fn sum_service() -> Service {
        Service::new("Foo").unwrap().method("Sum", |args: Args, reply: &mut i32| {
            *reply = args.num1 + args.num2;
            Ok(())
        })
    }

    #[test]
    fn service_name_must_be_exported() {
        assert!(Service::new("Foo").is_ok());
        assert!(matches!(
            Service::new("foo"),
            Err(RpcError::InvalidServiceName(n)) if n == "foo"
        ));
        assert!(Service::new("").is_err());
    }

    #[test]
    fn non_exported_method_is_skipped() {
        let svc = Service::new("Foo")
            .unwrap()
            .method("sum", |_: i32, _: &mut i32| Ok(()));
        assert!(svc.get_method("sum").is_none());
    }

    #[tokio::test]
    async fn call_decodes_invokes_and_encodes() {
        let svc = sum_service();
        let method = svc.get_method("Sum").unwrap();

        for codec in [CodecType::Gob, CodecType::Json] {
            let arg = codec.encode(&Args { num1: 3, num2: 4 }).unwrap();
            let reply_bytes = method.call(codec, arg).await.unwrap();
            let reply: i32 = codec.decode(&reply_bytes).unwrap();
            assert_eq!(reply, 7);
        }
    }

    #[tokio::test]
    async fn call_counter_increments() {
        let svc = sum_service();
        let method = svc.get_method("Sum").unwrap();
        assert_eq!(method.num_calls(), 0);

        let codec = CodecType::Gob;
        let arg = codec.encode(&Args { num1: 1, num2: 2 }).unwrap();
        method.call(codec, arg.clone()).await.unwrap();
        method.call(codec, arg).await.unwrap();
        assert_eq!(method.num_calls(), 2);
    }

    #[tokio::test]
    async fn method_error_propagates() {
        let svc = Service::new("Foo")
            .unwrap()
            .method("Fail", |_: u64, _: &mut u64| {
                Err(RpcError::Handler("no such thing".to_string()))
            });
        let method = svc.get_method("Fail").unwrap();
        let arg = CodecType::Gob.encode(&1u64).unwrap();

        let err = method.call(CodecType::Gob, arg).await.unwrap_err();
        assert_eq!(err.to_string(), "no such thing");
    }

    #[tokio::test]
    async fn panicking_method_is_recovered() {
        let svc = Service::new("Foo")
            .unwrap()
            .method("Boom", |_: u64, _: &mut u64| -> Result<()> { panic!("boom") });
        let method = svc.get_method("Boom").unwrap();
        let arg = CodecType::Gob.encode(&1u64).unwrap();

        let err = method.call(CodecType::Gob, arg).await.unwrap_err();
        assert!(err.to_string().contains("method panicked: boom"));
        // the counter still advanced; the registry survived
        assert_eq!(method.num_calls(), 1);
    }

    #[tokio::test]
    async fn undecodable_argument_is_an_error() {
        let svc = sum_service();
        let method = svc.get_method("Sum").unwrap();
        let err = method.call(CodecType::Json, b"{broken".to_vec()).await.unwrap_err();
        assert!(matches!(err, RpcError::Json(_)));
    }

    #[tokio::test]
    async fn reply_containers_start_empty() {
        let svc = Service::new("Dict").unwrap().method(
            "Insert",
            |key: String, reply: &mut HashMap<String, u64>| {
                assert!(reply.is_empty());
                reply.insert(key, 1);
                Ok(())
            },
        );
        let method = svc.get_method("Insert").unwrap();

        let codec = CodecType::Json;
        let arg = codec.encode(&"k".to_string()).unwrap();
        let reply_bytes = method.call(codec, arg).await.unwrap();
        let reply: HashMap<String, u64> = codec.decode(&reply_bytes).unwrap();
        assert_eq!(reply, HashMap::from([("k".to_string(), 1)]));
    }
}

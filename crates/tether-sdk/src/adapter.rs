//! Call adapters: uniform invocation closures for native methods
//!
//! A method of any arity is turned into one `CallAdapter`:
//!
//! ```text
//! (receiver: *mut (), frame: &mut CallFrame) -> BridgeResult<usize>
//! ```
//!
//! Typed methods (`Fn(&T, A1..An) -> R` or `Fn(&mut T, A1..An) -> R`) read
//! frame positions `1..=n` through `ToNative`, call the method, and push the
//! result through `IntoReturn`. Pure-frame methods receive the frame itself
//! and report their own result count.
//!
//! `Method` is implemented per arity by `impl_method!`, up to eight
//! arguments.

use crate::bridge::ExposedClass;
use crate::error::BridgeResult;
use crate::frame::CallFrame;
use crate::marshal::{ToDynamic, ToNative};
use std::sync::Arc;

/// Type-erased invocation closure stored in a method's descriptor
pub type CallAdapter =
    Arc<dyn Fn(*mut (), &mut CallFrame<'_>) -> BridgeResult<usize> + Send + Sync>;

/// Receiver marker for `&self` methods
pub struct Shared;

/// Receiver marker for `&mut self` methods
pub struct Exclusive;

/// Convert a method's return value into pushed results.
pub trait IntoReturn {
    /// Push results and return how many were pushed
    fn push_into(self, frame: &mut CallFrame<'_>) -> BridgeResult<usize>;
}

impl IntoReturn for () {
    fn push_into(self, _frame: &mut CallFrame<'_>) -> BridgeResult<usize> {
        Ok(0)
    }
}

impl<R: ToDynamic> IntoReturn for R {
    fn push_into(self, frame: &mut CallFrame<'_>) -> BridgeResult<usize> {
        frame.push(self.to_dynamic());
        Ok(1)
    }
}

impl<R: IntoReturn> IntoReturn for BridgeResult<R> {
    fn push_into(self, frame: &mut CallFrame<'_>) -> BridgeResult<usize> {
        self?.push_into(frame)
    }
}

/// A native object pointer returned from a method, pushed as its proxy.
pub struct Exposed<U: ExposedClass>(*mut U);

impl<U: ExposedClass> Exposed<U> {
    /// Wrap a pointer for return through the bridge.
    ///
    /// # Safety
    /// Same contract as [`Bridge::bind`](crate::Bridge::bind): `ptr` must be
    /// null or stay valid while any proxy bound to it is in use.
    pub unsafe fn new(ptr: *mut U) -> Self {
        Exposed(ptr)
    }
}

impl<U: ExposedClass> IntoReturn for Exposed<U> {
    fn push_into(self, frame: &mut CallFrame<'_>) -> BridgeResult<usize> {
        let value = unsafe { frame.bridge().bind(self.0)? };
        frame.push(value);
        Ok(1)
    }
}

/// A native method callable through the bridge.
///
/// `Args` is a marker tuple (receiver kind plus argument types) that keeps
/// the per-arity implementations apart.
pub trait Method<T, Args>: Send + Sync + 'static {
    /// Invoke on `receiver` with arguments taken from `frame`
    fn call(&self, receiver: *mut T, frame: &mut CallFrame<'_>) -> BridgeResult<usize>;
}

macro_rules! impl_method {
    ($($arg:ident $pos:literal),*) => {
        impl<T, F, R, $($arg,)*> Method<T, (Shared, $($arg,)*)> for F
        where
            T: 'static,
            F: Fn(&T, $($arg),*) -> R + Send + Sync + 'static,
            R: IntoReturn,
            $($arg: ToNative,)*
        {
            #[allow(non_snake_case, unused_variables)]
            fn call(&self, receiver: *mut T, frame: &mut CallFrame<'_>) -> BridgeResult<usize> {
                $(let $arg = frame.get::<$arg>($pos)?;)*
                let receiver = unsafe { &*receiver };
                (self)(receiver, $($arg),*).push_into(frame)
            }
        }

        impl<T, F, R, $($arg,)*> Method<T, (Exclusive, $($arg,)*)> for F
        where
            T: 'static,
            F: Fn(&mut T, $($arg),*) -> R + Send + Sync + 'static,
            R: IntoReturn,
            $($arg: ToNative,)*
        {
            #[allow(non_snake_case, unused_variables)]
            fn call(&self, receiver: *mut T, frame: &mut CallFrame<'_>) -> BridgeResult<usize> {
                $(let $arg = frame.get::<$arg>($pos)?;)*
                let receiver = unsafe { &mut *receiver };
                (self)(receiver, $($arg),*).push_into(frame)
            }
        }
    };
}

impl_method!();
impl_method!(A1 1);
impl_method!(A1 1, A2 2);
impl_method!(A1 1, A2 2, A3 3);
impl_method!(A1 1, A2 2, A3 3, A4 4);
impl_method!(A1 1, A2 2, A3 3, A4 4, A5 5);
impl_method!(A1 1, A2 2, A3 3, A4 4, A5 5, A6 6);
impl_method!(A1 1, A2 2, A3 3, A4 4, A5 5, A6 6, A7 7);
impl_method!(A1 1, A2 2, A3 3, A4 4, A5 5, A6 6, A7 7, A8 8);

fn erase<F>(f: F) -> CallAdapter
where
    F: Fn(*mut (), &mut CallFrame<'_>) -> BridgeResult<usize> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Build the type-erased adapter for `method` on receivers of type `T`
pub fn adapter<T, Args, M>(method: M) -> CallAdapter
where
    T: 'static,
    M: Method<T, Args>,
{
    erase(move |receiver, frame| method.call(receiver.cast::<T>(), frame))
}

/// Build the adapter for a pure-frame method, which reads its own arguments
/// and returns its own result count
pub fn frame_adapter<T, F>(method: F) -> CallAdapter
where
    T: 'static,
    F: Fn(&mut T, &mut CallFrame<'_>) -> BridgeResult<usize> + Send + Sync + 'static,
{
    erase(move |receiver, frame| {
        let receiver = unsafe { &mut *receiver.cast::<T>() };
        method(receiver, frame)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Bridge;
    use crate::error::BridgeError;
    use crate::identity::ProxyHandle;
    use crate::value::DynValue;

    struct Counter {
        value: i64,
    }

    impl Counter {
        fn get(&self) -> i64 {
            self.value
        }

        fn add(&mut self, n: i64) {
            self.value += n;
        }

        fn scaled(&self, factor: i8, offset: f64, label: String) -> String {
            format!("{}:{}", label, self.value as f64 * factor as f64 + offset)
        }

        fn fail(&self) -> BridgeResult<i64> {
            Err(BridgeError::Host {
                kind: "TestError",
                code: 5,
                message: "boom".into(),
            })
        }

        fn needs_object(&self, _other: ProxyHandle) -> bool {
            true
        }

        fn push_many(&mut self, frame: &mut CallFrame<'_>) -> BridgeResult<usize> {
            let n = frame.arg_count();
            for i in 1..=n {
                let v = frame.arg(i).clone();
                frame.push(v);
            }
            Ok(n)
        }
    }

    fn run(adapter: &CallAdapter, counter: &mut Counter, args: Vec<DynValue>) -> BridgeResult<Vec<DynValue>> {
        let bridge = Bridge::new();
        let mut frame = CallFrame::new(&bridge, args);
        let count = adapter((counter as *mut Counter).cast(), &mut frame)?;
        Ok(frame.into_results(count))
    }

    #[test]
    fn test_shared_getter_pushes_one() {
        let a = adapter(Counter::get);
        let mut c = Counter { value: 7 };
        assert_eq!(run(&a, &mut c, vec![]).unwrap(), vec![DynValue::Int(7)]);
    }

    #[test]
    fn test_unit_return_pushes_nothing() {
        let a = adapter(Counter::add);
        let mut c = Counter { value: 1 };
        assert_eq!(run(&a, &mut c, vec![DynValue::Int(4)]).unwrap(), vec![]);
        assert_eq!(c.value, 5);
    }

    #[test]
    fn test_positional_marshaling() {
        let a = adapter(Counter::scaled);
        let mut c = Counter { value: 2 };
        let out = run(
            &a,
            &mut c,
            vec![DynValue::Int(259), DynValue::Num(0.5), DynValue::str("v")],
        )
        .unwrap();
        // 259 wraps to 3 as i8
        assert_eq!(out, vec![DynValue::str("v:6.5")]);
    }

    #[test]
    fn test_error_return_propagates() {
        let a = adapter(Counter::fail);
        let mut c = Counter { value: 0 };
        let err = run(&a, &mut c, vec![]).unwrap_err();
        assert!(matches!(err, BridgeError::Host { code: 5, .. }));
    }

    #[test]
    fn test_object_argument_mismatch() {
        let a = adapter(Counter::needs_object);
        let mut c = Counter { value: 0 };
        let err = run(&a, &mut c, vec![DynValue::Int(1)]).unwrap_err();
        assert_eq!(
            err,
            BridgeError::MarshalType {
                position: 1,
                expected: "object",
                got: "integer"
            }
        );
    }

    #[test]
    fn test_pure_frame_method() {
        let a = frame_adapter(Counter::push_many);
        let mut c = Counter { value: 0 };
        let out = run(&a, &mut c, vec![DynValue::Int(1), DynValue::Bool(true)]).unwrap();
        assert_eq!(out, vec![DynValue::Int(1), DynValue::Bool(true)]);
    }

    #[test]
    fn test_closure_method() {
        let a = adapter(|c: &mut Counter, a: i64, b: i64| {
            c.value = a * b;
            c.value
        });
        let mut c = Counter { value: 0 };
        let out = run(&a, &mut c, vec![DynValue::Int(6), DynValue::Int(7)]).unwrap();
        assert_eq!(out, vec![DynValue::Int(42)]);
        assert_eq!(c.value, 42);
    }
}

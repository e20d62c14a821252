//! The work functions that can be scheduled must implement the `Callable` trait.

use jiff::Zoned;
use std::fmt;

/// The error type user work functions may fail with.
pub type JobFailure = Box<dyn std::error::Error + Send + Sync>;

/// What a run of user code produced: an optional return value, or a failure.
///
/// The value (if any) travels on the `JobExecuted` event; failures travel on
/// `JobError` and never propagate past the executor.
pub type JobOutcome = std::result::Result<Option<serde_json::Value>, JobFailure>;

/// A job's work is anything that implements this trait.
///
/// `run_times` carries every scheduled instant this invocation covers; it has
/// one entry except when coalescing folded several missed firings together.
/// Executors catch panics from `call`, so a panicking work function takes
/// down nothing but its own run.
pub trait Callable: Send + Sync {
    /// Execute this callable.
    fn call(&self, run_times: &[Zoned]) -> JobOutcome;
    /// Get the name of this callable.
    fn name(&self) -> &str;
}

impl fmt::Debug for dyn Callable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Callable(name={})", self.name())
    }
}

/// A named work function taking no parameters.
pub struct UnitToUnit {
    name: String,
    work: fn() -> JobOutcome,
}

impl UnitToUnit {
    pub fn new(name: &str, work: fn() -> JobOutcome) -> Self {
        Self {
            name: name.into(),
            work,
        }
    }
}

impl Callable for UnitToUnit {
    fn call(&self, _run_times: &[Zoned]) -> JobOutcome {
        (self.work)()
    }
    fn name(&self) -> &str {
        &self.name
    }
}

/// A named work function taking one parameter.
pub struct OneToUnit<T>
where
    T: Clone + Send + Sync,
{
    name: String,
    work: fn(T) -> JobOutcome,
    arg: T,
}

impl<T> OneToUnit<T>
where
    T: Clone + Send + Sync,
{
    pub fn new(name: &str, work: fn(T) -> JobOutcome, arg: T) -> Self {
        Self {
            name: name.into(),
            work,
            arg,
        }
    }
}

impl<T> Callable for OneToUnit<T>
where
    T: Clone + Send + Sync,
{
    fn call(&self, _run_times: &[Zoned]) -> JobOutcome {
        (self.work)(self.arg.clone())
    }
    fn name(&self) -> &str {
        &self.name
    }
}

/// A named work function taking two parameters.
pub struct TwoToUnit<T, U>
where
    T: Clone + Send + Sync,
    U: Clone + Send + Sync,
{
    name: String,
    work: fn(T, U) -> JobOutcome,
    arg_one: T,
    arg_two: U,
}

impl<T, U> TwoToUnit<T, U>
where
    T: Clone + Send + Sync,
    U: Clone + Send + Sync,
{
    pub fn new(name: &str, work: fn(T, U) -> JobOutcome, arg_one: T, arg_two: U) -> Self {
        Self {
            name: name.into(),
            work,
            arg_one,
            arg_two,
        }
    }
}

impl<T, U> Callable for TwoToUnit<T, U>
where
    T: Clone + Send + Sync,
    U: Clone + Send + Sync,
{
    fn call(&self, _run_times: &[Zoned]) -> JobOutcome {
        (self.work)(self.arg_one.clone(), self.arg_two.clone())
    }
    fn name(&self) -> &str {
        &self.name
    }
}

/// A named work function taking three parameters.
pub struct ThreeToUnit<T, U, V>
where
    T: Clone + Send + Sync,
    U: Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    name: String,
    work: fn(T, U, V) -> JobOutcome,
    arg_one: T,
    arg_two: U,
    arg_three: V,
}

impl<T, U, V> ThreeToUnit<T, U, V>
where
    T: Clone + Send + Sync,
    U: Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    pub fn new(
        name: &str,
        work: fn(T, U, V) -> JobOutcome,
        arg_one: T,
        arg_two: U,
        arg_three: V,
    ) -> Self {
        Self {
            name: name.into(),
            work,
            arg_one,
            arg_two,
            arg_three,
        }
    }
}

impl<T, U, V> Callable for ThreeToUnit<T, U, V>
where
    T: Clone + Send + Sync,
    U: Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn call(&self, _run_times: &[Zoned]) -> JobOutcome {
        (self.work)(
            self.arg_one.clone(),
            self.arg_two.clone(),
            self.arg_three.clone(),
        )
    }
    fn name(&self) -> &str {
        &self.name
    }
}

/// A named closure.  Unlike the fixed-arity adapters this one also sees the
/// scheduled run times, which is how user code observes coalescing.
pub struct Closure<F>
where
    F: Fn(&[Zoned]) -> JobOutcome + Send + Sync,
{
    name: String,
    work: F,
}

impl<F> Closure<F>
where
    F: Fn(&[Zoned]) -> JobOutcome + Send + Sync,
{
    pub fn new(name: &str, work: F) -> Self {
        Self {
            name: name.into(),
            work,
        }
    }
}

impl<F> Callable for Closure<F>
where
    F: Fn(&[Zoned]) -> JobOutcome + Send + Sync,
{
    fn call(&self, run_times: &[Zoned]) -> JobOutcome {
        (self.work)(run_times)
    }
    fn name(&self) -> &str {
        &self.name
    }
}

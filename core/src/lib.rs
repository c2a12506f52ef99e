//! # Composable Rust Core
//!
//! Core traits and types for the Composable Rust architecture.
//!
//! This crate provides the fundamental abstractions for building
//! functional-core/imperative-shell backend systems using the Reducer pattern.
//!
//! ## Core Concepts
//!
//! - **State**: Domain state for a feature
//! - **Action**: All possible inputs to a reducer (commands, provider responses)
//! - **Reducer**: Pure function `(State, Action, Environment) → (State, Effects)`
//! - **Effect**: Side effect descriptions (not execution)
//! - **Environment**: Injected dependencies via traits
//!
//! ## Architecture Principles
//!
//! - Functional Core, Imperative Shell
//! - Unidirectional Data Flow
//! - Explicit Effects (no hidden I/O)
//! - Dependency Injection via Environment
//!
//! ## Example
//!
//! ```ignore
//! use composable_rust_core::*;
//!
//! #[derive(Clone, Debug)]
//! struct OrderState {
//!     orders: HashMap<OrderId, Order>,
//! }
//!
//! #[derive(Clone, Debug)]
//! enum OrderAction {
//!     PlaceOrder { customer_id: CustomerId, items: Vec<LineItem> },
//!     OrderPlaced { order_id: OrderId, timestamp: DateTime<Utc> },
//! }
//!
//! impl Reducer for OrderReducer {
//!     type State = OrderState;
//!     type Action = OrderAction;
//!     type Environment = OrderEnvironment;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut OrderState,
//!         action: OrderAction,
//!         env: &OrderEnvironment,
//!     ) -> SmallVec<[Effect<OrderAction>; 4]> {
//!         smallvec![]
//!     }
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{smallvec, SmallVec};

pub mod composition;

/// Reducer module - the core trait for business logic.
///
/// Reducers are pure functions: `(State, Action, Environment) → (State, Effects)`.
/// They contain all business logic and are deterministic and testable.
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// The Reducer trait - core abstraction for business logic.
    ///
    /// # Type Parameters
    ///
    /// - `State`: The domain state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    ///
    /// # Example
    ///
    /// ```ignore
    /// impl Reducer for OrderReducer {
    ///     type State = OrderState;
    ///     type Action = OrderAction;
    ///     type Environment = OrderEnvironment;
    ///
    ///     fn reduce(
    ///         &self,
    ///         state: &mut OrderState,
    ///         action: OrderAction,
    ///         env: &OrderEnvironment,
    ///     ) -> SmallVec<[Effect<OrderAction>; 4]> {
    ///         match action {
    ///             OrderAction::PlaceOrder { customer_id, items } => {
    ///                 smallvec::smallvec![Effect::None]
    ///             }
    ///             _ => smallvec::smallvec![Effect::None],
    ///         }
    ///     }
    /// }
    /// ```
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects.
        ///
        /// This is a pure function that:
        /// 1. Validates the action
        /// 2. Updates state in place
        /// 3. Returns effect descriptions to be executed
        ///
        /// Returns a small vector of effects to be executed by the runtime.
        /// Most reducers produce zero to a handful of effects per action, so a
        /// stack-allocated `SmallVec` avoids a heap allocation on the hot path.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Effect module - side effect descriptions.
///
/// Effects describe side effects to be performed by the runtime.
/// They are values (not execution) and are composable and cancellable.
pub mod effect {
    use std::future::Future;
    use std::pin::Pin;
    use std::time::Duration;

    /// Effect type - describes a side effect to be executed.
    ///
    /// Effects are NOT executed immediately. They are descriptions of what should
    /// happen, returned from reducers and executed by the Store runtime.
    ///
    /// # Type Parameters
    ///
    /// - `Action`: the action type that effects can produce (feedback loop)
    #[allow(missing_docs)]
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Run effects in parallel
        Parallel(Vec<Effect<Action>>),

        /// Run effects sequentially
        Sequential(Vec<Effect<Action>>),

        /// Delayed action (for timeouts, retries)
        Delay {
            /// How long to wait
            duration: Duration,
            /// Action to dispatch after delay
            action: Box<Action>,
        },

        /// Arbitrary async computation.
        ///
        /// Returns `Option<Action>` - if Some, the action is fed back into the reducer.
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),
    }

    // Manual Debug implementation since Future doesn't implement Debug
    impl<Action> std::fmt::Debug for Effect<Action>
    where
        Action: std::fmt::Debug,
    {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Parallel(effects) => {
                    f.debug_tuple("Effect::Parallel").field(effects).finish()
                },
                Effect::Sequential(effects) => {
                    f.debug_tuple("Effect::Sequential").field(effects).finish()
                },
                Effect::Delay { duration, action } => f
                    .debug_struct("Effect::Delay")
                    .field("duration", duration)
                    .field("action", action)
                    .finish(),
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Combine effects to run in parallel.
        #[must_use]
        pub const fn merge(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Parallel(effects)
        }

        /// Chain effects to run sequentially.
        #[must_use]
        pub const fn chain(effects: Vec<Effect<Action>>) -> Effect<Action> {
            Effect::Sequential(effects)
        }

        /// Transform the action type of this effect.
        ///
        /// Useful for composing effects from different reducers or wrapping
        /// actions in a higher-level action type.
        pub fn map<B, F>(self, f: F) -> Effect<B>
        where
            F: Fn(Action) -> B + Send + Sync + 'static + Clone,
            Action: 'static,
            B: Send + 'static,
        {
            map_effect(self, f)
        }
    }

    // Standalone so recursive calls don't need to re-derive the bound on `Self`.
    fn map_effect<A, B, F>(effect: Effect<A>, f: F) -> Effect<B>
    where
        F: Fn(A) -> B + Send + Sync + 'static + Clone,
        A: 'static,
        B: Send + 'static,
    {
        match effect {
            Effect::None => Effect::None,
            Effect::Parallel(effects) => Effect::Parallel(
                effects
                    .into_iter()
                    .map(|e| map_effect(e, f.clone()))
                    .collect(),
            ),
            Effect::Sequential(effects) => Effect::Sequential(
                effects
                    .into_iter()
                    .map(|e| map_effect(e, f.clone()))
                    .collect(),
            ),
            Effect::Delay { duration, action } => Effect::Delay {
                duration,
                action: Box::new(f(*action)),
            },
            Effect::Future(fut) => Effect::Future(Box::pin(async move { fut.await.map(f) })),
        }
    }
}

/// Environment module - dependency injection traits.
///
/// All external dependencies are abstracted behind traits and injected
/// via the Environment parameter.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// struct SystemClock;
    /// impl Clock for SystemClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         Utc::now()
    ///     }
    /// }
    ///
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time.
        fn now(&self) -> DateTime<Utc>;
    }
}

pub use effect::Effect;
pub use reducer::Reducer;

//! Provider bundle.
//!
//! [`Providers`] folds the network, time and task providers into one type
//! parameter so connection types can be written `Connection<P: Providers>`
//! instead of carrying three generics around.

use crate::{
    MemoryNetworkProvider, NetworkProvider, TaskProvider, TimeProvider, TokioNetworkProvider,
    TokioTaskProvider, TokioTimeProvider,
};

/// Bundle of provider types for a runtime environment.
pub trait Providers: Clone + 'static {
    /// Network provider type for connections and listeners.
    type Network: NetworkProvider + Clone + 'static;

    /// Time provider type for sleep, timeout, and time queries.
    type Time: TimeProvider + Clone + 'static;

    /// Task provider type for spawning local tasks.
    type Task: TaskProvider + Clone + 'static;

    /// Get the network provider instance.
    fn network(&self) -> &Self::Network;

    /// Get the time provider instance.
    fn time(&self) -> &Self::Time;

    /// Get the task provider instance.
    fn task(&self) -> &Self::Task;
}

/// Tokio providers, generic over the network.
///
/// `TokioProviders` uses TCP; `TokioProviders<MemoryNetworkProvider>` keeps
/// everything in process.
#[derive(Clone)]
pub struct TokioProviders<N = TokioNetworkProvider> {
    network: N,
    time: TokioTimeProvider,
    task: TokioTaskProvider,
}

impl TokioProviders {
    /// Providers using TCP networking.
    pub fn new() -> Self {
        Self::with_network(TokioNetworkProvider::new())
    }
}

impl TokioProviders<MemoryNetworkProvider> {
    /// Providers sharing the given in-memory network.
    pub fn memory(network: MemoryNetworkProvider) -> Self {
        Self::with_network(network)
    }
}

impl<N> TokioProviders<N> {
    /// Providers using the given network provider.
    pub fn with_network(network: N) -> Self {
        Self {
            network,
            time: TokioTimeProvider::new(),
            task: TokioTaskProvider,
        }
    }
}

impl Default for TokioProviders {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: NetworkProvider + Clone + 'static> Providers for TokioProviders<N> {
    type Network = N;
    type Time = TokioTimeProvider;
    type Task = TokioTaskProvider;

    fn network(&self) -> &Self::Network {
        &self.network
    }

    fn time(&self) -> &Self::Time {
        &self.time
    }

    fn task(&self) -> &Self::Task {
        &self.task
    }
}

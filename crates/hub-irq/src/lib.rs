#![doc = "Interrupt-to-loop bridge for sensor hubs: GPIO edge watcher, timestamp queue, wake coalescing, and burst dispatch."]

pub mod bridge;
pub mod dispatch;
pub mod gpio;
pub mod line;
pub mod queue;
pub mod realtime;
pub mod wake;
pub mod watcher;

pub use bridge::*;
pub use dispatch::*;
pub use gpio::GpioLine;
pub use line::*;
pub use queue::*;
pub use realtime::*;
pub use wake::*;
pub use watcher::*;

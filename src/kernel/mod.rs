//! Angular kernel functions and their evaluation strategies

pub mod arc_cosine;
pub mod device;
pub mod formula;
pub mod function;
pub mod laplace_sphere;
pub mod linear;
pub mod neural_tangent;
pub mod staged;
pub mod strategy;
pub mod traits;

pub use self::arc_cosine::ArcCosineKernel;
pub use self::device::{DeviceKernel, DeviceLaunch, DeviceParams, LaunchConfig};
pub use self::formula::{Formula, Program};
pub use self::function::{KernelConfig, KernelFunction, KernelKind, KernelTag};
pub use self::laplace_sphere::{LaplaceKernelSphere, LaplaceKernelSphereDecay};
pub use self::neural_tangent::NeuralTangentKernel;
pub use self::staged::TilePlan;
pub use self::strategy::{select_strategy, KernelCapabilities, ProblemShape, Strategy};
pub use self::traits::{Auxiliary, AuxiliaryRef, Kernel};

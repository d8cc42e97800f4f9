pub mod cpu;
pub mod schemas;

use anyhow::Result;
use opshim::dispatcher::KERNEL_REGISTRARS;
use opshim::{
    register_kernel_operator, register_kernel_operator_with_array_input,
    register_kernel_operator_with_array_input_and_parameters,
    register_kernel_operator_with_parameters, Dispatcher, ParameterDef,
};

pub use cpu::register_cpu_kernels;
pub use schemas::{Add, Relu, Scale, ScaledSum, Sum};

register_kernel_operator!(Add, "Add");
register_kernel_operator!(Relu, "Relu");
register_kernel_operator_with_parameters!(Scale, "Scale", [ParameterDef::float("alpha", 1.0)]);
register_kernel_operator_with_array_input!(Sum, "Sum");
register_kernel_operator_with_array_input_and_parameters!(
    ScaledSum,
    "ScaledSum",
    [ParameterDef::float("scale", 1.0)],
);

// Picked up by every dispatcher built with `Dispatcher::with_registered_kernels`.
#[linkme::distributed_slice(KERNEL_REGISTRARS)]
static REGISTER_CPU_KERNELS: fn(&Dispatcher) -> Result<()> = register_cpu_kernels;

/// Names of the operators this crate registers.
pub const OPERATORS: [&str; 5] = ["Add", "Relu", "Scale", "Sum", "ScaledSum"];

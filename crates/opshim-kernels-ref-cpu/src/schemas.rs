//! Kernel signatures for the reference operators.

use opshim::{ArgumentSchema, OpSchema, OpSchemaDef};

pub const ADD: &str = "ref::add";
pub const RELU: &str = "ref::relu";
pub const SCALE: &str = "ref::scale";
pub const SUM: &str = "ref::sum";
pub const SCALED_SUM: &str = "ref::scaled_sum";

/// `ref::add(Tensor a, Tensor b) -> (out)`
pub struct Add;

impl OpSchemaDef for Add {
    fn schema() -> OpSchema {
        OpSchema::new(
            ADD,
            [ArgumentSchema::tensor("a"), ArgumentSchema::tensor("b")],
            ["out"],
        )
    }
}

pub struct Relu;

impl OpSchemaDef for Relu {
    fn schema() -> OpSchema {
        OpSchema::new(RELU, [ArgumentSchema::tensor("x")], ["out"])
    }
}

/// `ref::scale(Tensor x, float alpha) -> (out)`
pub struct Scale;

impl OpSchemaDef for Scale {
    fn schema() -> OpSchema {
        OpSchema::new(
            SCALE,
            [ArgumentSchema::tensor("x"), ArgumentSchema::double("alpha")],
            ["out"],
        )
    }
}

pub struct Sum;

impl OpSchemaDef for Sum {
    fn schema() -> OpSchema {
        OpSchema::new(SUM, [ArgumentSchema::tensor_list("inputs")], ["out"])
    }
}

/// Sum of all inputs multiplied by `scale`.
pub struct ScaledSum;

impl OpSchemaDef for ScaledSum {
    fn schema() -> OpSchema {
        OpSchema::new(
            SCALED_SUM,
            [
                ArgumentSchema::tensor_list("inputs"),
                ArgumentSchema::double("scale"),
            ],
            ["out"],
        )
    }
}

pub(crate) fn all() -> [OpSchema; 5] {
    [
        Add::schema(),
        Relu::schema(),
        Scale::schema(),
        Sum::schema(),
        ScaledSum::schema(),
    ]
}

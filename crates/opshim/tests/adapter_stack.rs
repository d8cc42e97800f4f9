use std::sync::{Arc, Mutex};

use opshim::{
    AdapterSpec, ArgumentSchema, ArgumentValue, BridgeConfig, DType, DispatchError, Dispatcher,
    IValue, IValueKind, InputMode, KernelOperatorAdapter, OpSchema, Operator, OperatorDef,
    ParameterDef, Stack, Tensor, TensorData, Workspace,
};

type Recorded = Arc<Mutex<Vec<Stack>>>;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Dispatcher whose kernels for `schema` record every stack they are called with.
fn recording_dispatcher(schema: OpSchema) -> (Arc<Dispatcher>, Recorded) {
    let dispatcher = Dispatcher::new();
    let name = schema.name().to_string();
    dispatcher.register_schema(schema).expect("schema registers");
    let recorded: Recorded = Arc::default();
    let sink = Arc::clone(&recorded);
    dispatcher
        .register_catch_all(&name, "record", move |stack: &mut Stack| {
            sink.lock().unwrap().push(stack.clone());
            Ok(())
        })
        .expect("kernel registers");
    (Arc::new(dispatcher), recorded)
}

fn workspace(dispatcher: &Arc<Dispatcher>) -> Workspace {
    Workspace::with_dispatcher(Arc::clone(dispatcher)).with_config(BridgeConfig::default())
}

fn add_schema() -> OpSchema {
    OpSchema::new(
        "Add",
        [ArgumentSchema::tensor("a"), ArgumentSchema::tensor("b")],
        ["out"],
    )
}

#[test]
fn fixed_arity_stack_is_inputs_then_outputs() {
    init_logging();
    let (dispatcher, recorded) = recording_dispatcher(add_schema());
    let mut ws = workspace(&dispatcher);
    let a = Tensor::from_vec([2], vec![1.0, 2.0]).unwrap();
    let b = Tensor::from_vec([2], vec![3.0, 4.0]).unwrap();
    ws.set_blob("A", a.clone());
    ws.set_blob("B", b.clone());

    let def = OperatorDef::new("Add", ["A", "B"], ["C"]);
    let spec = AdapterSpec::new(add_schema(), InputMode::Fixed, &[]);
    let mut op = KernelOperatorAdapter::new(&def, &mut ws, spec).unwrap();
    assert_eq!(op.num_inputs(), 2);
    assert!(op.run().unwrap());

    let c = ws.blob("C").unwrap();
    let stacks = recorded.lock().unwrap();
    assert_eq!(stacks.len(), 1);
    assert_eq!(
        stacks[0],
        vec![IValue::Tensor(a), IValue::Tensor(b), IValue::Tensor(c)]
    );
}

#[test]
fn parameters_sit_between_inputs_and_outputs() {
    const PARAMS: &[ParameterDef] = &[
        ParameterDef::float("alpha", 1.0),
        ParameterDef::int("axis", 0),
    ];
    let schema = OpSchema::new(
        "Affine",
        [
            ArgumentSchema::tensor("x"),
            ArgumentSchema::double("alpha"),
            ArgumentSchema::new("axis", IValueKind::Int),
        ],
        ["y", "mask"],
    );
    let (dispatcher, recorded) = recording_dispatcher(schema.clone());
    let mut ws = workspace(&dispatcher);
    ws.set_blob("x", Tensor::zeros([3]));

    let def = OperatorDef::new("Affine", ["x"], ["y", "mask"])
        .with_arg("alpha", ArgumentValue::F(0.25));
    let spec = AdapterSpec::new(schema, InputMode::Fixed, PARAMS);
    let mut op = KernelOperatorAdapter::new(&def, &mut ws, spec).unwrap();
    op.run().unwrap();

    let stacks = recorded.lock().unwrap();
    let stack = &stacks[0];
    // k + p + outputs
    assert_eq!(stack.len(), 1 + 2 + 2);
    let kinds: Vec<IValueKind> = stack.iter().map(IValue::kind).collect();
    assert_eq!(
        kinds,
        vec![
            IValueKind::Tensor,
            IValueKind::Double,
            IValueKind::Int,
            IValueKind::Tensor,
            IValueKind::Tensor,
        ]
    );
    assert_eq!(stack[1], IValue::Double(0.25));
    assert_eq!(stack[2], IValue::Int(0));
    assert!(stack[3].as_tensor().unwrap().same_storage(&ws.blob("y").unwrap()));
    assert!(stack[4].as_tensor().unwrap().same_storage(&ws.blob("mask").unwrap()));
}

fn sum_schema() -> OpSchema {
    OpSchema::new("Sum", [ArgumentSchema::tensor_list("inputs")], ["out"])
}

#[test]
fn variadic_inputs_collapse_into_one_list_slot() {
    for n in [0usize, 1, 3] {
        let (dispatcher, recorded) = recording_dispatcher(sum_schema());
        let mut ws = workspace(&dispatcher);
        let names: Vec<String> = (0..n).map(|i| format!("x{i}")).collect();
        let tensors: Vec<Tensor> = names
            .iter()
            .map(|name| {
                let tensor = Tensor::zeros([2]);
                ws.set_blob(name.clone(), tensor.clone());
                tensor
            })
            .collect();

        let def = OperatorDef::new("Sum", names.clone(), ["out"]);
        let spec = AdapterSpec::new(sum_schema(), InputMode::Variadic, &[]);
        let mut op = KernelOperatorAdapter::new(&def, &mut ws, spec).unwrap();
        op.run().unwrap();

        let stacks = recorded.lock().unwrap();
        let stack = &stacks[0];
        assert_eq!(stack.len(), 2, "n = {n}");
        let list = stack[0].as_tensor_list().unwrap();
        assert_eq!(list.len(), n);
        for (got, want) in list.iter().zip(&tensors) {
            assert!(got.same_storage(want));
        }
    }
}

#[test]
fn kernel_resolves_once_per_signature() {
    let dispatcher = Arc::new(Dispatcher::new());
    dispatcher.register_schema(add_schema()).unwrap();
    dispatcher
        .register_kernel("Add", DType::F32, "add_f32", |_stack: &mut Stack| Ok(()))
        .unwrap();
    dispatcher
        .register_kernel("Add", DType::I32, "add_i32", |_stack: &mut Stack| Ok(()))
        .unwrap();

    let mut ws = workspace(&dispatcher);
    let a = Tensor::from_vec([1], vec![1.0]).unwrap();
    ws.set_blob("A", a.clone());
    ws.set_blob("B", Tensor::from_vec([1], vec![2.0]).unwrap());
    let def = OperatorDef::new("Add", ["A", "B"], ["C"]);
    let mut op = KernelOperatorAdapter::new(
        &def,
        &mut ws,
        AdapterSpec::new(add_schema(), InputMode::Fixed, &[]),
    )
    .unwrap();

    for _ in 0..5 {
        op.run().unwrap();
    }
    assert_eq!(op.resolution_count(), 1);

    // Changing an input's dtype changes the stack signature and forces a new lookup.
    a.assign([1], TensorData::I32(vec![1])).unwrap();
    op.run().unwrap();
    op.run().unwrap();
    assert_eq!(op.resolution_count(), 2);
}

#[test]
fn reordered_list_dtypes_resolve_again() {
    let dispatcher = Arc::new(Dispatcher::new());
    dispatcher.register_schema(sum_schema()).unwrap();
    let calls: Arc<Mutex<Vec<&'static str>>> = Arc::default();
    for (dtype, label) in [(DType::F32, "sum_f32"), (DType::I32, "sum_i32")] {
        let calls = Arc::clone(&calls);
        dispatcher
            .register_kernel("Sum", dtype, label, move |_stack: &mut Stack| {
                calls.lock().unwrap().push(label);
                Ok(())
            })
            .unwrap();
    }

    let mut ws = workspace(&dispatcher);
    let x = Tensor::from_vec([1], vec![1.0]).unwrap();
    let y = Tensor::from_i32([1], vec![2]).unwrap();
    ws.set_blob("x", x.clone());
    ws.set_blob("y", y.clone());
    let def = OperatorDef::new("Sum", ["x", "y"], ["out"]);
    let spec = AdapterSpec::new(sum_schema(), InputMode::Variadic, &[]);
    let mut op = KernelOperatorAdapter::new(&def, &mut ws, spec).unwrap();
    op.run().unwrap();

    // Same dtype set, different leading dtype.
    x.assign([1], TensorData::I32(vec![1])).unwrap();
    y.assign([1], TensorData::F32(vec![2.0])).unwrap();
    op.run().unwrap();

    assert_eq!(*calls.lock().unwrap(), vec!["sum_f32", "sum_i32"]);
    assert_eq!(op.resolution_count(), 2);
}

#[test]
fn cached_kernel_is_reused_after_reregistration() {
    let dispatcher = Arc::new(Dispatcher::new());
    dispatcher.register_schema(add_schema()).unwrap();
    let calls: Arc<Mutex<Vec<&'static str>>> = Arc::default();
    let register = |label: &'static str| {
        let calls = Arc::clone(&calls);
        dispatcher
            .register_kernel("Add", DType::F32, label, move |_stack: &mut Stack| {
                calls.lock().unwrap().push(label);
                Ok(())
            })
            .unwrap();
    };
    register("v1");

    let mut ws = workspace(&dispatcher);
    ws.set_blob("A", Tensor::zeros([1]));
    ws.set_blob("B", Tensor::zeros([1]));
    let def = OperatorDef::new("Add", ["A", "B"], ["C"]);
    let mut op = KernelOperatorAdapter::new(
        &def,
        &mut ws,
        AdapterSpec::new(add_schema(), InputMode::Fixed, &[]),
    )
    .unwrap();
    op.run().unwrap();
    register("v2");
    op.run().unwrap();

    assert_eq!(*calls.lock().unwrap(), vec!["v1", "v1"]);
}

#[test]
fn verification_detects_stale_cached_kernel() {
    let dispatcher = Arc::new(Dispatcher::new());
    dispatcher.register_schema(add_schema()).unwrap();
    dispatcher
        .register_kernel("Add", DType::F32, "v1", |_stack: &mut Stack| Ok(()))
        .unwrap();

    let config = BridgeConfig {
        verify_cached_kernels: true,
        ..BridgeConfig::default()
    };
    let mut ws = Workspace::with_dispatcher(Arc::clone(&dispatcher)).with_config(config);
    ws.set_blob("A", Tensor::zeros([1]));
    ws.set_blob("B", Tensor::zeros([1]));
    let def = OperatorDef::new("Add", ["A", "B"], ["C"]);
    let mut op = KernelOperatorAdapter::new(
        &def,
        &mut ws,
        AdapterSpec::new(add_schema(), InputMode::Fixed, &[]),
    )
    .unwrap();
    op.run().unwrap();
    op.run().unwrap();

    dispatcher
        .register_kernel("Add", DType::F32, "v2", |_stack: &mut Stack| Ok(()))
        .unwrap();
    let err = op.run().unwrap_err();
    match err.downcast_ref::<DispatchError>() {
        Some(DispatchError::KernelMismatch { cached, resolved, .. }) => {
            assert_eq!(cached, "v1");
            assert_eq!(resolved, "v2");
        }
        other => panic!("expected kernel mismatch, got {other:?}"),
    }
}

#[test]
fn dispatch_and_kernel_errors_propagate_unchanged() {
    #[derive(Debug, thiserror::Error)]
    #[error("kernel exploded")]
    struct Boom;

    let dispatcher = Arc::new(Dispatcher::new());
    dispatcher.register_schema(add_schema()).unwrap();
    dispatcher
        .register_kernel("Add", DType::F32, "boom", |_stack: &mut Stack| Err(Boom.into()))
        .unwrap();

    let mut ws = workspace(&dispatcher);
    ws.set_blob("A", Tensor::zeros([1]));
    ws.set_blob("B", Tensor::zeros([1]));
    let def = OperatorDef::new("Add", ["A", "B"], ["C"]);
    let spec = || AdapterSpec::new(add_schema(), InputMode::Fixed, &[]);
    let mut op = KernelOperatorAdapter::new(&def, &mut ws, spec()).unwrap();
    let err = op.run().unwrap_err();
    assert!(err.downcast_ref::<Boom>().is_some());

    ws.set_blob("A", Tensor::from_i32([1], vec![1]).unwrap());
    let mut op = KernelOperatorAdapter::new(&def, &mut ws, spec()).unwrap();
    let err = op.run().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DispatchError>(),
        Some(DispatchError::NoKernel { .. })
    ));
    assert_eq!(op.resolution_count(), 0);
}

#[test]
fn kernel_writes_through_output_handles() {
    let dispatcher = Arc::new(Dispatcher::new());
    dispatcher.register_schema(add_schema()).unwrap();
    dispatcher
        .register_kernel("Add", DType::F32, "fill", |stack: &mut Stack| {
            let out = stack[2].as_tensor()?;
            out.assign([2], TensorData::F32(vec![7.0, 8.0]))
        })
        .unwrap();

    let mut ws = workspace(&dispatcher);
    ws.set_blob("A", Tensor::zeros([2]));
    ws.set_blob("B", Tensor::zeros([2]));
    let before = ws.create_blob("C");
    let def = OperatorDef::new("Add", ["A", "B"], ["C"]);
    let mut op = KernelOperatorAdapter::new(
        &def,
        &mut ws,
        AdapterSpec::new(add_schema(), InputMode::Fixed, &[]),
    )
    .unwrap();
    op.run().unwrap();

    assert_eq!(before.to_f32_vec().unwrap(), vec![7.0, 8.0]);
    assert!(before.same_storage(&ws.blob("C").unwrap()));
}

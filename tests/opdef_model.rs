use opdsl::{
    dims, symbols, AffineLeaf, AffineMap, AffineRef, Expression, IndexExpr, ModelError, OpDef,
    PrimFn, ShapeSpec, TensorDef, TensorId, TypeVar,
};

fn matmul_op() -> OpDef {
    let (m, n, k) = dims!(m, n, k);
    let (big_m, big_n, big_k) = symbols!(M, N, K);

    let mut od = OpDef::new("matmul");
    od.register_tensor(
        "A",
        TensorDef::new(TypeVar::new("T"), [big_m.clone(), big_k.clone()]),
    )
    .expect("register A");
    od.register_tensor("B", TensorDef::new(TypeVar::new("T"), [big_k, big_n.clone()]))
        .expect("register B");
    od.register_tensor(
        "C",
        TensorDef::new(TypeVar::new("U"), [big_m, big_n]).output(),
    )
    .expect("register C");

    let a = od
        .use_tensor("A", &[m.clone().into(), k.clone().into()])
        .expect("subscript A");
    let b = od
        .use_tensor("B", &[k.into(), n.clone().into()])
        .expect("subscript B");
    od.accumulate("C", &[m.into(), n.into()], PrimFn::Add, a * b)
        .expect("accumulate into C");
    od
}

#[test]
fn matmul_builds_one_reduction_comprehension_over_k() {
    let od = matmul_op();

    assert_eq!(od.tensor_count(), 3);
    assert_eq!(od.comprehensions().len(), 1);

    let comprehension = &od.comprehensions()[0];
    assert_eq!(comprehension.definitions().len(), 1);
    let target = &comprehension.definitions()[0];
    assert_eq!(target.tensor_name().as_str(), "C");
    assert_eq!(target.tensor(), TensorId(2));
    assert_eq!(target.rank(), 2);

    match &comprehension.values()[0] {
        Expression::Reduce(apply) => {
            assert_eq!(apply.reduce.op, PrimFn::Add);
            let reduce_dims: Vec<_> = apply.reduce.dims.iter().cloned().collect();
            assert_eq!(reduce_dims, vec![AffineLeaf::dim("k")]);
            assert_eq!(apply.args.len(), 1);
            match &apply.args[0] {
                Expression::Prim(product) => {
                    assert_eq!(product.prim, PrimFn::Mul);
                    assert_eq!(product.args.len(), 2);
                    match (&product.args[0], &product.args[1]) {
                        (Expression::TensorUse(lhs), Expression::TensorUse(rhs)) => {
                            assert_eq!(lhs.tensor_name().as_str(), "A");
                            assert_eq!(rhs.tensor_name().as_str(), "B");
                        }
                        other => panic!("expected two tensor reads, got {other:?}"),
                    }
                }
                other => panic!("expected mul under the reduction, got {other:?}"),
            }
        }
        other => panic!("expected a reduction comprehension, got {other:?}"),
    }
}

#[test]
fn duplicate_registration_fails_and_first_wins() {
    let big_m = AffineLeaf::symbol("M");
    let mut od = OpDef::new("dup");
    od.register_tensor("A", TensorDef::new(TypeVar::new("T"), [big_m.clone()]))
        .expect("first registration");

    let err = od
        .register_tensor(
            "A",
            TensorDef::new(TypeVar::new("U"), [big_m]).output(),
        )
        .unwrap_err();
    assert_eq!(
        err,
        ModelError::DuplicateTensor {
            name: "A".to_string(),
        }
    );

    let survivor = od.tensor("A").expect("first registration intact");
    assert_eq!(survivor.type_var().as_str(), "T");
    assert!(!survivor.is_output());
    assert_eq!(od.tensor_count(), 1);
}

#[test]
fn attaching_a_registered_tensor_elsewhere_fails() {
    let big_m = AffineLeaf::symbol("M");
    let mut first = OpDef::new("first");
    first
        .register_tensor("A", TensorDef::new(TypeVar::new("T"), [big_m]))
        .expect("register A");
    let attached = first.tensor("A").unwrap().clone();

    let mut second = OpDef::new("second");
    let err = second.register_tensor("B", attached).unwrap_err();
    assert_eq!(
        err,
        ModelError::AlreadyAttached {
            tensor: "A".to_string(),
            op: "first".to_string(),
        }
    );
    assert_eq!(second.tensor_count(), 0);
    // The original attachment is untouched.
    assert_eq!(first.tensor("A").unwrap().id().unwrap(), TensorId(0));
}

#[test]
fn unknown_tensor_lookup_is_a_typed_error() {
    let od = OpDef::new("empty");
    assert_eq!(
        od.tensor("missing").unwrap_err(),
        ModelError::UnknownTensor {
            name: "missing".to_string(),
        }
    );
}

#[test]
fn constant_subscript_is_rejected_and_appends_nothing() {
    let (m, n) = dims!(m, n);
    let (big_m, big_n) = symbols!(M, N);
    let mut od = OpDef::new("bad_subscript");
    od.register_tensor(
        "C",
        TensorDef::new(TypeVar::new("T"), [big_m, big_n]).output(),
    )
    .expect("register C");

    let value = Expression::from(
        od.use_tensor("C", &[m.clone().into(), n.clone().into()])
            .expect("valid subscript"),
    );
    let err = od
        .assign("C", &[m.into(), IndexExpr::Const(7)], value)
        .unwrap_err();
    assert_eq!(
        err,
        ModelError::InvalidIndex {
            tensor: "C".to_string(),
            found: "constant 7".to_string(),
        }
    );
    assert!(od.comprehensions().is_empty());
}

#[test]
fn subset_right_hand_side_infers_an_empty_reduction() {
    let (m, n) = dims!(m, n);
    let (big_m, big_n) = symbols!(M, N);
    let mut od = OpDef::new("copy");
    od.register_tensor("A", TensorDef::new(TypeVar::new("T"), [big_m.clone(), big_n.clone()]))
        .expect("register A");
    od.register_tensor(
        "C",
        TensorDef::new(TypeVar::new("T"), [big_m, big_n]).output(),
    )
    .expect("register C");

    let a = od
        .use_tensor("A", &[m.clone().into(), n.clone().into()])
        .expect("subscript A");
    od.accumulate("C", &[m.into(), n.into()], PrimFn::Add, a.into())
        .expect("elementwise accumulation is legal");

    match &od.comprehensions()[0].values()[0] {
        Expression::Reduce(apply) => assert!(apply.reduce.dims.is_empty()),
        other => panic!("expected a degenerate reduction, got {other:?}"),
    }
}

#[test]
fn inferred_reduction_order_is_deterministic_across_builds() {
    let first = matmul_op();
    let second = matmul_op();
    assert_eq!(first, second);
    assert_eq!(first.to_string(), second.to_string());
}

#[test]
fn inferred_reduction_follows_rhs_encounter_order() {
    let (b, m, k0, k1) = dims!(b, m, k0, k1);
    let (big_b, big_m, big_k0, big_k1) = symbols!(B, M, K0, K1);
    let mut od = OpDef::new("pool");
    od.register_tensor(
        "X",
        TensorDef::new(
            TypeVar::new("T"),
            [big_b.clone(), big_k0, big_k1, big_m.clone()],
        ),
    )
    .expect("register X");
    od.register_tensor(
        "Y",
        TensorDef::new(TypeVar::new("T"), [big_b, big_m]).output(),
    )
    .expect("register Y");

    let x = od
        .use_tensor(
            "X",
            &[b.clone().into(), k1.clone().into(), k0.clone().into(), m.clone().into()],
        )
        .expect("subscript X");
    od.accumulate("Y", &[b.into(), m.into()], PrimFn::Max, x.into())
        .expect("max-pool accumulation");

    match &od.comprehensions()[0].values()[0] {
        Expression::Reduce(apply) => {
            let inferred: Vec<_> = apply.reduce.dims.iter().cloned().collect();
            // k1 is read before k0 on the right-hand side.
            assert_eq!(inferred, vec![k1, k0]);
        }
        other => panic!("expected a reduction, got {other:?}"),
    }
}

#[test]
fn shape_coercion_is_idempotent() {
    let mut od = matmul_op();

    let coerced_a = od.coerce_tensor_shape("A").expect("coerce A");
    assert_eq!(coerced_a.dim_count(), 0);
    assert_eq!(
        coerced_a.results(),
        &[AffineRef::Symbol(0), AffineRef::Symbol(1)]
    );

    // Already-coerced shapes pass through unchanged.
    let spec = od.tensor("A").unwrap().shape().clone();
    assert!(matches!(spec, ShapeSpec::Map(_)));
    let again = od.coerce_shape(&spec).expect("coerce map");
    assert_eq!(ShapeSpec::Map(again), spec);

    // Coercing the same leaf sequence twice yields structurally equal maps.
    let leaves = ShapeSpec::Leaves([AffineLeaf::symbol("M"), AffineLeaf::symbol("K")].into_iter().collect());
    let once = od.coerce_shape(&leaves).expect("first coercion");
    let twice = od.coerce_shape(&leaves).expect("second coercion");
    assert_eq!(once, twice);
}

#[test]
fn shapes_share_one_symbol_space_per_definition() {
    let mut od = matmul_op();
    od.coerce_tensor_shape("A").expect("coerce A");
    let coerced_b = od.coerce_tensor_shape("B").expect("coerce B");
    // B's extents are K and N; K was already numbered by A's coercion.
    assert_eq!(
        coerced_b.results(),
        &[AffineRef::Symbol(1), AffineRef::Symbol(2)]
    );
    assert_eq!(coerced_b.symbol_count(), 3);
}

#[test]
fn dimension_leaf_in_a_shape_is_a_scope_violation() {
    let mut od = OpDef::new("bad_shape");
    let spec = ShapeSpec::Leaves(
        [AffineLeaf::symbol("M"), AffineLeaf::dim("m")]
            .into_iter()
            .collect(),
    );
    let err = od.coerce_shape(&spec).unwrap_err();
    assert!(matches!(err, ModelError::ScopeViolation { .. }));
}

#[test]
fn display_dump_is_golden_stable() {
    let od = matmul_op();
    let expected = "\
opdef @matmul (export = matmul) {
  tensors:
    A : TensorDef(T, shape = [M, K])
    B : TensorDef(T, shape = [K, N])
    C : TensorDef(OUTPUT U, shape = [M, N])
  comprehensions:
    C[m, n] = reduce_add(k)(mul(A[m, k], B[k, n]))
}
";
    assert_eq!(od.to_string(), expected);
}

#[test]
fn json_round_trip_preserves_structure_and_order() {
    let od = matmul_op();
    let json = od.to_json_string().expect("serialize");
    let restored = OpDef::from_json_str(&json).expect("deserialize");
    assert_eq!(restored, od);

    let names: Vec<_> = restored
        .tensors()
        .map(|(name, _)| name.as_str().to_string())
        .collect();
    assert_eq!(names, vec!["A", "B", "C"]);
}

#[test]
fn json_with_mismatched_binding_lists_is_rejected() {
    let od = matmul_op();
    let mut doc: serde_json::Value =
        serde_json::from_str(&od.to_json_string().expect("serialize")).expect("parse json");
    // Strip the value side of the comprehension so the binding lists no
    // longer pair up.
    doc["comprehensions"][0]["values"] = serde_json::Value::Array(Vec::new());
    assert!(OpDef::from_json_str(&doc.to_string()).is_err());
}

#[test]
fn multi_binding_comprehension_prints_as_a_tuple() {
    let i = AffineLeaf::dim("i");
    let big_n = AffineLeaf::symbol("N");
    let mut od = OpDef::new("exp_log");
    od.register_tensor("X", TensorDef::new(TypeVar::new("T"), [big_n.clone()]))
        .expect("register X");
    od.register_tensor(
        "Y",
        TensorDef::new(TypeVar::new("T"), [big_n.clone()]).output(),
    )
    .expect("register Y");
    od.register_tensor("Z", TensorDef::new(TypeVar::new("T"), [big_n]).output())
        .expect("register Z");

    let x = od.use_tensor("X", &[i.clone().into()]).expect("subscript X");
    let y = od.use_tensor("Y", &[i.clone().into()]).expect("subscript Y");
    let z = od.use_tensor("Z", &[i.into()]).expect("subscript Z");
    od.add_comprehension(vec![
        (y, Expression::from(x.clone()).exp()),
        (z, Expression::from(x).log()),
    ])
    .expect("two bindings");

    assert_eq!(od.comprehensions().len(), 1);
    let comprehension = &od.comprehensions()[0];
    assert_eq!(comprehension.definitions().len(), 2);
    assert_eq!(comprehension.values().len(), 2);
    assert_eq!(
        comprehension.to_string(),
        "(Y[i], Z[i]) = (exp(X[i]), log(X[i]))"
    );
}

#[test]
fn empty_binding_list_is_a_definition_error() {
    let mut od = OpDef::new("no_bindings");
    let err = od.add_comprehension(Vec::new()).unwrap_err();
    assert_eq!(err, ModelError::EmptyComprehension);
    assert!(od.comprehensions().is_empty());
}

#[test]
fn prebuilt_map_shapes_are_accepted_at_registration() {
    let map = AffineMap::new(0, 2, vec![AffineRef::Symbol(0), AffineRef::Symbol(1)]);
    let mut od = OpDef::new("premapped");
    od.register_tensor("A", TensorDef::with_map(TypeVar::new("T"), map.clone()))
        .expect("register A");
    let coerced = od
        .coerce_tensor_shape("A")
        .expect("pass-through coercion");
    assert_eq!(coerced, map);
}

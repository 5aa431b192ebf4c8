//! End-to-end expression evaluation against real OpenCL devices.
//!
//! Every test degrades to a skip when no device is available.

use std::rc::Rc;

use veld::expr::{fabs, sqrt};
use veld::{Context, DType, Error, Expr, MultiVector, Range, Slicer, UserFunction, Vector};

fn test_context() -> Option<Rc<Context>> {
    let _ = env_logger::builder().is_test(true).try_init();
    Context::all_devices().ok()
}

#[test]
fn broadcast_assignment_evaluates_per_slot() {
    let Some(ctx) = test_context() else {
        println!("no OpenCL devices available, skipping test");
        return;
    };
    let x = MultiVector::from_host(ctx.clone(), 2, &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
    let y = MultiVector::with_size(ctx.clone(), 2, 2, DType::Float32).unwrap();

    // Arity-1 scalars broadcast to both slots; the multi-component value
    // contributes one entry per slot.
    y.assign(2.0f32 * &x + Expr::multi(&[10.0f32, 20.0])).unwrap();
    ctx.finish().unwrap();

    let parts = y.read_components::<f32>().unwrap();
    assert_eq!(parts, vec![vec![12.0, 14.0], vec![26.0, 28.0]]);
}

#[test]
fn target_may_appear_in_its_own_expression() {
    let Some(ctx) = test_context() else {
        println!("no OpenCL devices available, skipping test");
        return;
    };
    let x = MultiVector::from_host(ctx.clone(), 2, &[1.0f32, 2.0, 3.0, 4.0]).unwrap();

    x.assign(&x * &x).unwrap();
    ctx.finish().unwrap();

    let parts = x.read_components::<f32>().unwrap();
    assert_eq!(parts, vec![vec![1.0, 4.0], vec![9.0, 16.0]]);
}

#[test]
fn compound_assignment_folds_into_one_kernel() {
    let Some(ctx) = test_context() else {
        println!("no OpenCL devices available, skipping test");
        return;
    };
    let x = MultiVector::from_host(ctx.clone(), 2, &[1.0f32, 2.0, 3.0, 4.0]).unwrap();

    x.assign_add(10.0f32).unwrap();
    x.assign_mul(2.0f32).unwrap();
    ctx.finish().unwrap();

    let parts = x.read_components::<f32>().unwrap();
    assert_eq!(parts, vec![vec![22.0, 24.0], vec![26.0, 28.0]]);
}

#[test]
fn structurally_identical_assignments_compile_once() {
    let Some(ctx) = test_context() else {
        println!("no OpenCL devices available, skipping test");
        return;
    };
    let per_shape = ctx.queues().len();
    let x = MultiVector::from_host(ctx.clone(), 2, &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
    let y = MultiVector::with_size(ctx.clone(), 2, 2, DType::Float32).unwrap();

    y.assign(2.0f32 * &x + 1.0f32).unwrap();
    assert_eq!(ctx.compile_count(), per_shape);

    // Same shape, different values: cache hit.
    y.assign(-3.5f32 * &x + 42.0f32).unwrap();
    assert_eq!(ctx.compile_count(), per_shape);

    // Different shape: one more compile per device context.
    y.assign(&x + &y).unwrap();
    assert_eq!(ctx.compile_count(), 2 * per_shape);
    ctx.finish().unwrap();
}

#[test]
fn tuple_assignment_swaps_components() {
    let Some(ctx) = test_context() else {
        println!("no OpenCL devices available, skipping test");
        return;
    };
    let x = MultiVector::from_host(ctx.clone(), 2, &[1.0f32, 2.0, 3.0, 4.0]).unwrap();

    // Both right-hand sides read before either store, so the swap is
    // exact even though the tuple reads the target's own components.
    x.assign_tuple(vec![
        Expr::array(x.component(1)),
        Expr::array(x.component(0)),
    ])
    .unwrap();
    ctx.finish().unwrap();

    let parts = x.read_components::<f32>().unwrap();
    assert_eq!(parts, vec![vec![3.0, 4.0], vec![1.0, 2.0]]);
}

#[test]
fn tuple_arity_must_match_width() {
    let Some(ctx) = test_context() else {
        println!("no OpenCL devices available, skipping test");
        return;
    };
    let x = MultiVector::from_host(ctx, 2, &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
    assert!(matches!(
        x.assign_tuple(vec![Expr::from(1.0f32)]),
        Err(Error::ComponentMismatch {
            found: 1,
            expected: 2,
            ..
        })
    ));
}

#[test]
fn builtin_and_user_functions_evaluate() {
    let Some(ctx) = test_context() else {
        println!("no OpenCL devices available, skipping test");
        return;
    };
    let x = MultiVector::from_host(ctx.clone(), 2, &[-3.0f32, 4.0, -5.0, 12.0]).unwrap();
    let y = MultiVector::with_size(ctx.clone(), 2, 2, DType::Float32).unwrap();

    y.assign(sqrt(&x * &x)).unwrap();
    ctx.finish().unwrap();
    assert_eq!(
        y.read_components::<f32>().unwrap(),
        vec![vec![3.0, 4.0], vec![5.0, 12.0]]
    );

    let clamp = UserFunction::new(2, "return prm1 > prm2 ? prm2 : prm1;");
    y.assign(clamp.call(vec![fabs(&x), Expr::from(4.0f32)])).unwrap();
    ctx.finish().unwrap();
    assert_eq!(
        y.read_components::<f32>().unwrap(),
        vec![vec![3.0, 4.0], vec![4.0, 4.0]]
    );
}

#[test]
fn comparisons_produce_indicator_values() {
    let Some(ctx) = test_context() else {
        println!("no OpenCL devices available, skipping test");
        return;
    };
    let x = MultiVector::from_host(ctx.clone(), 2, &[1.0f32, 5.0, 2.0, 8.0]).unwrap();
    let mask = MultiVector::with_size(ctx.clone(), 2, 2, DType::Float32).unwrap();

    mask.assign(x.gt(3.0f32)).unwrap();
    ctx.finish().unwrap();

    assert_eq!(
        mask.read_components::<f32>().unwrap(),
        vec![vec![0.0, 1.0], vec![0.0, 1.0]]
    );
}

#[test]
fn strided_view_feeds_an_assignment() {
    let Some(ctx) = test_context() else {
        println!("no OpenCL devices available, skipping test");
        return;
    };
    let host: Vec<f32> = (0..10).map(|i| i as f32).collect();
    let base = Vector::from_host(ctx.clone(), &host).unwrap().into_handle();
    let view = Slicer::new(&[10])
        .select(Range::stepped(1, 2, 10))
        .over(&base)
        .unwrap();

    let y = MultiVector::with_size(ctx.clone(), 1, 5, DType::Float32).unwrap();
    let result = y.assign(&view * 2.0f32);

    if ctx.queues().len() > 1 {
        // Views are restricted to single-queue contexts.
        assert!(matches!(result, Err(Error::ViewNeedsSingleDevice)));
        return;
    }
    result.unwrap();
    ctx.finish().unwrap();
    assert_eq!(
        y.read_components::<f32>().unwrap(),
        vec![vec![2.0, 6.0, 10.0, 14.0, 18.0]]
    );
}

#[test]
fn rank_two_view_selects_rows() {
    let Some(ctx) = test_context() else {
        println!("no OpenCL devices available, skipping test");
        return;
    };
    if ctx.queues().len() > 1 {
        println!("multiple compute queues, skipping view test");
        return;
    }
    // Row-major 4x4 matrix; rows 1..3 are elements 4..12.
    let host: Vec<f32> = (0..16).map(|i| i as f32).collect();
    let base = Vector::from_host(ctx.clone(), &host).unwrap().into_handle();
    let view = Slicer::new(&[4, 4])
        .select(Range::new(1, 3))
        .select(Range::new(0, 4))
        .over(&base)
        .unwrap();

    let y = MultiVector::with_size(ctx.clone(), 1, 8, DType::Float32).unwrap();
    y.assign(Expr::from(&view) + 0.5f32).unwrap();
    ctx.finish().unwrap();

    let got = y.read_components::<f32>().unwrap();
    let want: Vec<f32> = (4..12).map(|i| i as f32 + 0.5).collect();
    assert_eq!(got, vec![want]);
}

#[test]
fn duplicate_and_assign_from_copy_contents() {
    let Some(ctx) = test_context() else {
        println!("no OpenCL devices available, skipping test");
        return;
    };
    let x = MultiVector::from_host(ctx.clone(), 2, &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
    let copy = x.duplicate().unwrap();

    // Writes to the copy leave the original untouched.
    copy.assign_add(100.0f32).unwrap();
    ctx.finish().unwrap();
    assert_eq!(
        x.read_components::<f32>().unwrap(),
        vec![vec![1.0, 2.0], vec![3.0, 4.0]]
    );

    let mut z = MultiVector::with_size(ctx.clone(), 2, 2, DType::Float32).unwrap();
    z.assign_from(&copy).unwrap();
    assert_eq!(
        z.read_components::<f32>().unwrap(),
        vec![vec![101.0, 102.0], vec![103.0, 104.0]]
    );
}

#[test]
fn element_access_round_trips() {
    let Some(ctx) = test_context() else {
        println!("no OpenCL devices available, skipping test");
        return;
    };
    let x = MultiVector::from_host(ctx.clone(), 2, &[1i32, 2, 3, 4]).unwrap();
    assert_eq!(x.read_element::<i32>(1, 0).unwrap(), 3);

    x.write_element(0, 1, -9i32).unwrap();
    assert_eq!(
        x.read_components::<i32>().unwrap(),
        vec![vec![1, -9], vec![3, 4]]
    );
}

#[test]
fn integer_expressions_evaluate() {
    let Some(ctx) = test_context() else {
        println!("no OpenCL devices available, skipping test");
        return;
    };
    let x = MultiVector::from_host(ctx.clone(), 2, &[1i32, 2, 3, 4]).unwrap();
    let y = MultiVector::with_size(ctx.clone(), 2, 2, DType::Int32).unwrap();

    y.assign((&x << 2i32) | 1i32).unwrap();
    ctx.finish().unwrap();

    assert_eq!(
        y.read_components::<i32>().unwrap(),
        vec![vec![5, 9], vec![13, 17]]
    );
}

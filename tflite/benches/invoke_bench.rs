use criterion::{Criterion, black_box, criterion_group, criterion_main};
use giztoy_tflite::{Interpreter, Model, fake};
use serde_json::json;

fn mnist_model() -> Model {
    fake::install().unwrap();
    let desc = json!({
        "inputs": [{"name": "image", "shape": [1, 28, 28, 1], "dtype": "float32"}],
        "outputs": [{"name": "scores", "shape": [1, 10], "dtype": "float32"}],
        "ops": ["conv2d", "relu", "softmax"],
    });
    Model::from_buffer(serde_json::to_vec(&desc).unwrap()).unwrap()
}

fn bench_allocate(c: &mut Criterion) {
    let model = mnist_model();
    c.bench_function("tflite_create_allocate", |b| {
        b.iter(|| {
            let mut interp = Interpreter::new(&model, None).unwrap();
            interp.allocate_tensors().unwrap();
            black_box(interp.input_tensor_count());
        });
    });
}

fn bench_invoke(c: &mut Criterion) {
    let model = mnist_model();
    let mut interp = Interpreter::new(&model, None).unwrap();
    interp.allocate_tensors().unwrap();
    for v in interp.input_mut(0).unwrap().as_f32_mut().unwrap() {
        *v = 0.5;
    }

    c.bench_function("tflite_invoke_mnist", |b| {
        b.iter(|| {
            interp.invoke().unwrap();
            black_box(interp.output(0).unwrap().as_f32().unwrap()[0]);
        });
    });
}

criterion_group!(benches, bench_allocate, bench_invoke);
criterion_main!(benches);

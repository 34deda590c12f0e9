//! Frames on a real device
//!
//! Skipped when no adapter is available, which is the usual case on CI.

use tessera_core::{BaseTexture, BatchElement, Color, Matrix, Rectangle, Texture};
use tessera_gpu::{
    Backend, RenderItem, RenderOptions, Renderer, RendererConfig, ViewRect, WgpuBackend,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn renderer() -> Option<Renderer<WgpuBackend>> {
    init_tracing();
    match WgpuBackend::headless() {
        Ok(backend) => Some(Renderer::new(
            backend,
            RendererConfig::default()
                .with_size(8.0, 8.0)
                .with_background(Color::TRANSPARENT),
        )),
        Err(err) => {
            eprintln!("skipping: {}", err);
            None
        }
    }
}

fn solid(rgba: [u8; 4]) -> Texture {
    let pixels = rgba.repeat(4);
    let base = BaseTexture::from_buffer(pixels, 2, 2, Default::default()).unwrap();
    Texture::from_base(base)
}

#[test]
fn quad_covers_the_screen() {
    let Some(mut renderer) = renderer() else {
        return;
    };
    let quad = BatchElement::rectangle(
        solid([255, 0, 0, 255]),
        Rectangle::new(0.0, 0.0, 8.0, 8.0),
        Matrix::IDENTITY,
    );

    renderer
        .render(&[RenderItem::Batch(&quad)], RenderOptions::default())
        .unwrap();

    let pixels = renderer
        .backend_mut()
        .read_pixels(None, ViewRect::new(0, 0, 8, 8))
        .unwrap();
    assert_eq!(pixels.len(), 8 * 8 * 4);
    assert_eq!(&pixels[4 * (8 * 4 + 4)..][..4], &[255, 0, 0, 255]);
}

#[test]
fn partial_quad_leaves_the_background() {
    let Some(mut renderer) = renderer() else {
        return;
    };
    // top half in world space is the top rows of the screen
    let quad = BatchElement::rectangle(
        solid([0, 255, 0, 255]),
        Rectangle::new(0.0, 0.0, 8.0, 4.0),
        Matrix::IDENTITY,
    );

    renderer
        .render(&[RenderItem::Batch(&quad)], RenderOptions::default())
        .unwrap();

    let backend = renderer.backend_mut();
    let top = backend.read_pixels(None, ViewRect::new(0, 6, 1, 1)).unwrap();
    let bottom = backend.read_pixels(None, ViewRect::new(0, 1, 1, 1)).unwrap();
    assert_eq!(top, vec![0, 255, 0, 255]);
    assert_eq!(bottom, vec![0, 0, 0, 0]);
}

#[test]
fn pipelines_are_reused_across_frames() {
    let Some(mut renderer) = renderer() else {
        return;
    };
    let texture = solid([255, 255, 255, 255]);
    let quad = BatchElement::rectangle(texture, Rectangle::new(0.0, 0.0, 4.0, 4.0), Matrix::IDENTITY);

    renderer
        .render(&[RenderItem::Batch(&quad)], RenderOptions::default())
        .unwrap();
    let pipelines = renderer.backend().pipeline_count();
    renderer
        .render(&[RenderItem::Batch(&quad)], RenderOptions::default())
        .unwrap();

    assert!(pipelines > 0);
    assert_eq!(renderer.backend().pipeline_count(), pipelines);
}

//! Overlay windows on the headless GPU platform
//!
//! Covers context ownership across windows, teardown ordering, and what
//! happens to a mapped overlay when the GPU fails.

use std::sync::Arc;
use std::thread;

use mochi_canvas::headless::{GpuCall, GpuFault, HeadlessGpu, HeadlessWindowing, WindowEvent};
use mochi_canvas::{
    Canvas, Config, Error, Frame, GpuContextManager, GpuPlatform, OverlayWindow, PixelSource,
    RenderWindow, SharedOutput, StillImage, WindowOptions,
};

type Manager = Arc<GpuContextManager<HeadlessGpu>>;
type Overlay = OverlayWindow<HeadlessGpu, HeadlessWindowing>;

fn setup() -> (Manager, Arc<HeadlessWindowing>) {
    let manager = GpuContextManager::initialize(HeadlessGpu::new(), ()).unwrap();
    (manager, Arc::new(HeadlessWindowing::new()))
}

fn source(rgba: [u8; 4]) -> Box<dyn PixelSource> {
    Box::new(StillImage::new(Frame::solid(20, 10, rgba), 0, 0))
}

fn overlay(manager: &Manager, windowing: &Arc<HeadlessWindowing>, rgba: [u8; 4]) -> Overlay {
    OverlayWindow::new(
        Arc::clone(manager),
        Arc::clone(windowing),
        source(rgba),
        WindowOptions::at(1, 1),
    )
    .unwrap()
}

#[test]
fn test_manager_usable_after_window_drop() {
    let (manager, windowing) = setup();
    let first = overlay(&manager, &windowing, [255, 0, 0, 255]);
    first.generate_frame().unwrap();
    first.draw().unwrap();
    drop(first);
    assert_eq!(manager.live_surfaces(), 0);
    assert!(manager.platform().is_open());

    let second = overlay(&manager, &windowing, [0, 255, 0, 255]);
    second.generate_frame().unwrap();
    second.draw().unwrap();
    let presented = manager.platform().presented(second.surface()).unwrap();
    assert_eq!(presented.rgba_at(0, 0), [0, 255, 0, 255]);
}

#[test]
fn test_window_keeps_display_open() {
    let (manager, windowing) = setup();
    let window = overlay(&manager, &windowing, [1, 1, 1, 255]);
    assert_eq!(Arc::strong_count(&manager), 2);
    drop(window);
    assert_eq!(Arc::strong_count(&manager), 1);
    assert!(manager.platform().is_open());
    assert!(!manager.platform().calls().contains(&GpuCall::Terminate));
}

#[test]
fn test_windows_on_separate_threads_keep_their_contexts() {
    let (manager, windowing) = setup();
    let colors = [[255, 0, 0, 255], [0, 255, 0, 255], [0, 0, 255, 255]];
    let windows: Vec<Arc<Overlay>> = colors
        .iter()
        .map(|&rgba| Arc::new(overlay(&manager, &windowing, rgba)))
        .collect();

    let handles: Vec<_> = windows
        .iter()
        .map(|window| {
            let window = Arc::clone(window);
            thread::spawn(move || {
                for _ in 0..20 {
                    window.generate_frame().unwrap();
                    window.draw().unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for (window, rgba) in windows.iter().zip(colors) {
        let presented = manager.platform().presented(window.surface()).unwrap();
        assert_eq!(presented.rgba_at(10, 5), rgba);
        assert_eq!(manager.platform().swap_count(window.surface()), 20);
    }
    assert_eq!(manager.platform().current(), None);
}

#[test]
fn test_one_window_shared_across_threads() {
    let (manager, windowing) = setup();
    let window = Arc::new(overlay(&manager, &windowing, [40, 80, 120, 255]));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let window = Arc::clone(&window);
            thread::spawn(move || {
                for _ in 0..10 {
                    window.generate_frame().unwrap();
                    window.draw().unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(manager.platform().swap_count(window.surface()), 40);
    assert_eq!(manager.platform().current(), None);
}

#[test]
fn test_show_on_create_failure_unmaps_before_destroy() {
    let (manager, windowing) = setup();
    manager.platform().inject_fault(GpuFault::Context);
    let result = OverlayWindow::new(
        Arc::clone(&manager),
        Arc::clone(&windowing),
        source([0, 0, 0, 255]),
        WindowOptions::at(0, 0),
    );
    assert!(matches!(result, Err(Error::ContextCreation(_))));

    let events = windowing.events();
    assert!(matches!(events[0], WindowEvent::Create(..)));
    assert!(matches!(events[1], WindowEvent::Map(_)));
    assert!(matches!(events[2], WindowEvent::Unmap(_)));
    assert!(matches!(events[3], WindowEvent::Destroy(_)));
    assert_eq!(manager.live_surfaces(), 0);
}

#[test]
fn test_window_creation_failure_leaves_nothing() {
    let (manager, windowing) = setup();
    windowing.fail_create(true);
    let result = OverlayWindow::new(
        Arc::clone(&manager),
        Arc::clone(&windowing),
        source([0, 0, 0, 255]),
        WindowOptions::at(0, 0),
    );
    assert!(matches!(result, Err(Error::WindowCreation(_))));
    assert!(manager.platform().calls().iter().all(|c| *c == GpuCall::Open));
}

#[test]
fn test_upload_failure_unmaps_visible_overlay() {
    let (manager, windowing) = setup();
    let window = overlay(&manager, &windowing, [9, 9, 9, 255]);
    let native = *window.native_window().unwrap();
    manager.platform().inject_fault(GpuFault::Upload);

    let err = window.generate_frame().unwrap_err();
    assert!(err.is_resource_failure());
    assert!(!windowing.is_mapped(native));
    assert!(!window.is_visible());

    // Recovers once the GPU does
    manager.platform().clear_fault(GpuFault::Upload);
    window.generate_frame().unwrap();
    window.show();
    window.draw().unwrap();
    assert!(windowing.is_mapped(native));
}

#[test]
fn test_canvas_routes_expose_to_overlay() {
    let (manager, windowing) = setup();
    let mut canvas = Canvas::new(Config::default(), SharedOutput::new(std::io::sink()));
    let window = overlay(&manager, &windowing, [5, 6, 7, 255]);
    let surface = window.surface();
    window.generate_frame().unwrap();
    canvas.add("overlay", Box::new(window));

    canvas.handle_expose("overlay").unwrap();
    canvas.handle_expose("overlay").unwrap();
    assert_eq!(manager.platform().swap_count(surface), 2);

    canvas.hide("overlay");
    canvas.handle_expose("overlay").unwrap();
    assert_eq!(manager.platform().swap_count(surface), 2);

    assert!(canvas.remove("overlay"));
    assert_eq!(manager.live_contexts(), 0);
    assert_eq!(windowing.alive(), 0);
}

// Window surface creation from raw-window-handle
//
// One arm per windowing system we can present to. Anything else is
// EngineError::UnsupportedSurface.

use ash::extensions::khr;
use ash::{vk, Entry};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::ffi::c_char;

use crate::error::{EngineError, EngineResult};

/// Instance extensions needed to create a surface for `display`.
pub fn required_extensions(display: RawDisplayHandle) -> EngineResult<Vec<*const c_char>> {
    let platform = match display {
        RawDisplayHandle::Windows(_) => khr::Win32Surface::name(),
        RawDisplayHandle::Xlib(_) => khr::XlibSurface::name(),
        RawDisplayHandle::Xcb(_) => khr::XcbSurface::name(),
        RawDisplayHandle::Wayland(_) => khr::WaylandSurface::name(),
        _ => return Err(EngineError::UnsupportedSurface),
    };
    Ok(vec![khr::Surface::name().as_ptr(), platform.as_ptr()])
}

/// Create a `VkSurfaceKHR` for the window.
///
/// # Safety
/// The handles must stay valid for the lifetime of the returned surface.
pub unsafe fn create_surface(
    entry: &Entry,
    instance: &ash::Instance,
    display: RawDisplayHandle,
    window: RawWindowHandle,
) -> EngineResult<vk::SurfaceKHR> {
    let surface = match (display, window) {
        (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(window)) => {
            let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                .hinstance(window.hinstance.map_or(0, |h| h.get()) as vk::HINSTANCE)
                .hwnd(window.hwnd.get() as vk::HWND);
            khr::Win32Surface::new(entry, instance).create_win32_surface(&create_info, None)?
        }
        (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(window)) => {
            let dpy = display
                .display
                .ok_or_else(|| EngineError::Surface("Xlib display handle is null".to_string()))?;
            let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                .dpy(dpy.as_ptr().cast())
                .window(window.window);
            khr::XlibSurface::new(entry, instance).create_xlib_surface(&create_info, None)?
        }
        (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(window)) => {
            let connection = display
                .connection
                .ok_or_else(|| EngineError::Surface("XCB connection handle is null".to_string()))?;
            let create_info = vk::XcbSurfaceCreateInfoKHR::builder()
                .connection(connection.as_ptr())
                .window(window.window.get());
            khr::XcbSurface::new(entry, instance).create_xcb_surface(&create_info, None)?
        }
        (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(window)) => {
            let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                .display(display.display.as_ptr())
                .surface(window.surface.as_ptr());
            khr::WaylandSurface::new(entry, instance).create_wayland_surface(&create_info, None)?
        }
        _ => return Err(EngineError::UnsupportedSurface),
    };

    log::info!("Window surface created");
    Ok(surface)
}

//! Windows GDI backend
//!
//! Creates a printer device context whose paper is exactly the label
//! (DMPAPER_USER, 0.1 mm units), then stretches the label bitmap onto one
//! page. Every handle is held by an RAII guard so it is released on all
//! exit paths.

use super::{BackendKind, PrintAck, PrintBackend};
use crate::artifact::{ArtifactFormat, PrintArtifact};
use crate::error::{PrintError, PrintResult};
use crate::geometry::mm_to_px;
use crate::registry::PrinterIdentity;
use async_trait::async_trait;
use image::GrayImage;
use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::mem::{align_of, size_of};
use std::ptr::NonNull;
use tracing::{info, instrument};
use windows::Win32::Foundation::GetLastError;
use windows::Win32::Graphics::Gdi::{
    BI_RGB, BITMAPINFO, BITMAPINFOHEADER, CreateDCW, DEVMODEW, DIB_RGB_COLORS, DM_DEFAULTSOURCE,
    DM_PAPERLENGTH, DM_PAPERSIZE, DM_PAPERWIDTH, DMBIN_FORMSOURCE, DMPAPER_USER, DeleteDC,
    GetDeviceCaps, HDC, LOGPIXELSX, LOGPIXELSY, SRCCOPY, StretchDIBits,
};
use windows::Win32::Graphics::Printing::{
    ClosePrinter, DocumentPropertiesW, EnumPrintersW, GetDefaultPrinterW, OpenPrinterW,
    PRINTER_ENUM_CONNECTIONS, PRINTER_ENUM_LOCAL, PRINTER_HANDLE, PRINTER_INFO_5W,
};
use windows::Win32::Storage::Xps::DOCINFOW;
use windows::core::{PCWSTR, PWSTR, w};

#[link(name = "gdi32")]
unsafe extern "system" {
    fn AbortDoc(hdc: HDC) -> i32;
    fn EndDoc(hdc: HDC) -> i32;
    fn EndPage(hdc: HDC) -> i32;
    fn StartDocW(hdc: HDC, lpdi: *const DOCINFOW) -> i32;
    fn StartPage(hdc: HDC) -> i32;
}

/// Prints label bitmaps through the Windows spooler
#[derive(Debug, Default)]
pub struct GdiBackend;

impl GdiBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PrintBackend for GdiBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Gdi
    }

    fn supports(&self, format: ArtifactFormat) -> bool {
        format == ArtifactFormat::Bitmap
    }

    fn preferred_format(&self) -> ArtifactFormat {
        ArtifactFormat::Bitmap
    }

    async fn list_printers(&self) -> PrintResult<Vec<String>> {
        blocking(list_printers).await
    }

    async fn default_printer(&self) -> PrintResult<Option<String>> {
        blocking(default_printer).await
    }

    #[instrument(skip(self, artifact), fields(printer = %printer.name, title = artifact.title()))]
    async fn submit(
        &self,
        artifact: &PrintArtifact,
        printer: &PrinterIdentity,
    ) -> PrintResult<PrintAck> {
        let pixels = artifact.pixels().cloned().ok_or_else(|| {
            PrintError::UnsupportedArtifact(format!(
                "GDI backend needs bitmap pixels, got {}",
                artifact.format()
            ))
        })?;
        let name = printer.name.clone();
        let title = artifact.title().to_string();
        let (width_mm, height_mm) = artifact.size_mm();

        blocking(move || {
            if !list_printers()?.iter().any(|p| p == &name) {
                return Err(PrintError::PrinterNotFound(name.clone()));
            }
            print_bitmap(&name, &title, &pixels, width_mm, height_mm)
        })
        .await?;

        info!("Page sent to spooler");
        Ok(PrintAck {
            backend: BackendKind::Gdi,
            printer: printer.name.clone(),
            job_id: None,
        })
    }
}

/// Spooler calls block; keep them off the async workers
async fn blocking<T, F>(f: F) -> PrintResult<T>
where
    F: FnOnce() -> PrintResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PrintError::WindowsPrinter(format!("Print task failed: {e}")))?
}

/// Local and connected printers, virtual ports excluded
fn list_printers() -> PrintResult<Vec<String>> {
    unsafe {
        let flags = PRINTER_ENUM_LOCAL | PRINTER_ENUM_CONNECTIONS;
        let mut needed: u32 = 0;
        let mut returned: u32 = 0;

        let _ = EnumPrintersW(flags, None, 5, None, &mut needed, &mut returned);
        if needed == 0 {
            return Ok(Vec::new());
        }

        let mut buf: Vec<u8> = vec![0; needed as usize];
        EnumPrintersW(
            flags,
            None,
            5,
            Some(buf.as_mut_slice()),
            &mut needed,
            &mut returned,
        )
        .map_err(|e| PrintError::BackendUnavailable(format!("EnumPrintersW failed: {e}")))?;

        let infos =
            std::slice::from_raw_parts(buf.as_ptr() as *const PRINTER_INFO_5W, returned as usize);

        let mut printers = Vec::with_capacity(infos.len());
        for info in infos {
            if info.pPrinterName.is_null() {
                continue;
            }
            let name = PWSTR(info.pPrinterName.0).to_string().unwrap_or_default();
            let port = if info.pPortName.is_null() {
                String::new()
            } else {
                PWSTR(info.pPortName.0).to_string().unwrap_or_default()
            };
            if !is_virtual_port(&port) {
                printers.push(name);
            }
        }
        Ok(printers)
    }
}

fn is_virtual_port(port: &str) -> bool {
    let p = port.to_lowercase();
    matches!(p.as_str(), "file:" | "portprompt:" | "xpsport:" | "nul:")
        || p.starts_with("onenote")
        || p.starts_with("wfsport:")
}

fn default_printer() -> PrintResult<Option<String>> {
    unsafe {
        let mut needed: u32 = 0;
        let _ = GetDefaultPrinterW(None, &mut needed);
        if needed == 0 {
            return Ok(None);
        }

        let mut buf: Vec<u16> = vec![0; needed as usize];
        if !GetDefaultPrinterW(Some(PWSTR(buf.as_mut_ptr())), &mut needed).as_bool() {
            return Ok(None);
        }

        let name = PWSTR(buf.as_mut_ptr())
            .to_string()
            .map_err(|e| PrintError::WindowsPrinter(format!("UTF-16 decode failed: {e}")))?;
        Ok(Some(name))
    }
}

fn print_bitmap(
    printer: &str,
    title: &str,
    pixels: &GrayImage,
    width_mm: f32,
    height_mm: f32,
) -> PrintResult<()> {
    let (img_w, img_h) = pixels.dimensions();
    if img_w == 0 || img_h == 0 {
        return Err(PrintError::UnsupportedArtifact("empty bitmap".to_string()));
    }
    let bgra = gray_to_bgra(pixels);
    let title_w = to_wide(title);

    let hdc = create_label_dc(printer, width_mm, height_mm)?;

    unsafe {
        let _dc = HdcGuard(hdc);

        let di = DOCINFOW {
            cbSize: size_of::<DOCINFOW>() as i32,
            lpszDocName: PCWSTR::from_raw(title_w.as_ptr()),
            ..Default::default()
        };
        if StartDocW(hdc, &di) <= 0 {
            return Err(last_error("StartDoc"));
        }
        let mut doc = DocGuard { hdc, active: true };

        let dpi_x = GetDeviceCaps(Some(hdc), LOGPIXELSX).max(1);
        let dpi_y = GetDeviceCaps(Some(hdc), LOGPIXELSY).max(1);
        let target_w = (mm_to_px(width_mm, dpi_x as f32) as i32).max(1);
        let target_h = (mm_to_px(height_mm, dpi_y as f32) as i32).max(1);

        let bmi = BITMAPINFO {
            bmiHeader: BITMAPINFOHEADER {
                biSize: size_of::<BITMAPINFOHEADER>() as u32,
                biWidth: img_w as i32,
                // Negative height: top-down rows
                biHeight: -(img_h as i32),
                biPlanes: 1,
                biBitCount: 32,
                biCompression: BI_RGB.0,
                ..Default::default()
            },
            ..Default::default()
        };

        if StartPage(hdc) <= 0 {
            doc.abort();
            return Err(last_error("StartPage"));
        }

        let r = StretchDIBits(
            hdc,
            0,
            0,
            target_w,
            target_h,
            0,
            0,
            img_w as i32,
            img_h as i32,
            Some(bgra.as_ptr() as *const _),
            &bmi,
            DIB_RGB_COLORS,
            SRCCOPY,
        );
        if r == 0 {
            doc.abort();
            return Err(last_error("StretchDIBits"));
        }

        if EndPage(hdc) <= 0 {
            doc.abort();
            return Err(last_error("EndPage"));
        }

        doc.end()
    }
}

/// Device context with the label as a custom paper size
fn create_label_dc(printer: &str, width_mm: f32, height_mm: f32) -> PrintResult<HDC> {
    unsafe {
        let mut printer_w = to_wide(printer);
        let mut handle = PRINTER_HANDLE::default();
        OpenPrinterW(PWSTR(printer_w.as_mut_ptr()), &mut handle, None)
            .map_err(|_| PrintError::PrinterNotFound(printer.to_string()))?;
        let _printer = PrinterGuard(handle);

        let needed =
            DocumentPropertiesW(None, handle, PWSTR(printer_w.as_mut_ptr()), None, None, 0);
        if needed <= 0 {
            return Err(last_error("DocumentProperties"));
        }

        let layout = Layout::from_size_align(needed as usize, align_of::<DEVMODEW>())
            .map_err(|e| PrintError::WindowsPrinter(format!("DEVMODE layout: {e}")))?;
        let devmode = DevModeBuf::alloc(layout)?;
        let dm = devmode.as_ptr();

        // DM_OUT_BUFFER
        let r = DocumentPropertiesW(
            None,
            handle,
            PWSTR(printer_w.as_mut_ptr()),
            Some(dm),
            None,
            2,
        );
        if r != 1 {
            return Err(last_error("DocumentProperties(get)"));
        }

        (*dm).Anonymous1.Anonymous1.dmPaperSize = DMPAPER_USER as i16;
        (*dm).Anonymous1.Anonymous1.dmPaperWidth = (width_mm * 10.0).round() as i16;
        (*dm).Anonymous1.Anonymous1.dmPaperLength = (height_mm * 10.0).round() as i16;
        (*dm).Anonymous1.Anonymous1.dmDefaultSource = DMBIN_FORMSOURCE as i16;
        (*dm).dmFields |= DM_PAPERSIZE | DM_PAPERWIDTH | DM_PAPERLENGTH | DM_DEFAULTSOURCE;

        // DM_IN_BUFFER | DM_OUT_BUFFER
        let r = DocumentPropertiesW(
            None,
            handle,
            PWSTR(printer_w.as_mut_ptr()),
            Some(dm),
            Some(dm),
            10,
        );
        if r != 1 {
            return Err(last_error("DocumentProperties(set)"));
        }

        let hdc = CreateDCW(
            w!("WINSPOOL"),
            PCWSTR::from_raw(printer_w.as_ptr()),
            PCWSTR::null(),
            Some(dm as *const _),
        );
        if hdc.is_invalid() {
            return Err(last_error("CreateDC"));
        }
        Ok(hdc)
    }
}

/// Opaque 32-bit BGRA, top-down
fn gray_to_bgra(img: &GrayImage) -> Vec<u8> {
    let mut out = Vec::with_capacity(img.as_raw().len() * 4);
    for &v in img.as_raw() {
        out.extend_from_slice(&[v, v, v, 255]);
    }
    out
}

struct DevModeBuf {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl DevModeBuf {
    fn alloc(layout: Layout) -> PrintResult<Self> {
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw)
            .ok_or_else(|| PrintError::WindowsPrinter("DEVMODE allocation failed".to_string()))?;
        Ok(Self { ptr, layout })
    }

    fn as_ptr(&self) -> *mut DEVMODEW {
        self.ptr.as_ptr() as *mut DEVMODEW
    }
}

impl Drop for DevModeBuf {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

struct HdcGuard(HDC);

impl Drop for HdcGuard {
    fn drop(&mut self) {
        unsafe {
            let _ = DeleteDC(self.0);
        }
    }
}

struct PrinterGuard(PRINTER_HANDLE);

impl Drop for PrinterGuard {
    fn drop(&mut self) {
        unsafe {
            let _ = ClosePrinter(self.0);
        }
    }
}

/// Aborts the document unless it was ended
struct DocGuard {
    hdc: HDC,
    active: bool,
}

impl DocGuard {
    fn abort(&mut self) {
        if self.active {
            unsafe {
                let _ = AbortDoc(self.hdc);
            }
            self.active = false;
        }
    }

    fn end(&mut self) -> PrintResult<()> {
        if !self.active {
            return Ok(());
        }
        self.active = false;
        if unsafe { EndDoc(self.hdc) } <= 0 {
            return Err(last_error("EndDoc"));
        }
        Ok(())
    }
}

impl Drop for DocGuard {
    fn drop(&mut self) {
        self.abort();
    }
}

fn last_error(call: &str) -> PrintError {
    let code = unsafe { GetLastError().0 };
    PrintError::WindowsPrinter(format!("{call} failed (win32 error {code})"))
}

fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain([0]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_ports() {
        assert!(is_virtual_port("FILE:"));
        assert!(is_virtual_port("OneNote_2016"));
        assert!(is_virtual_port("WFSPort:"));
        assert!(!is_virtual_port("USB001"));
        assert!(!is_virtual_port("IP_192.168.1.20"));
    }

    #[test]
    fn test_gray_to_bgra() {
        let img = GrayImage::from_raw(2, 1, vec![0, 200]).unwrap();
        assert_eq!(gray_to_bgra(&img), vec![0, 0, 0, 255, 200, 200, 200, 255]);
    }
}

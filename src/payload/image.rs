use crate::error::{Result, WatchError};
use image::codecs::gif::GifDecoder;
use image::{
    AnimationDecoder, DynamicImage, ImageDecoder, ImageFormat, ImageReader, RgbImage, RgbaImage,
};
use std::io::Cursor;

/// Side length of the placeholder image served before the first fetch
pub const SENTINEL_SIZE: usize = 64;

/// Frames of `height x width x channels` floats in `[0, 1]`, plus a
/// `height x width` mask per frame (`1 - alpha`, zero when opaque).
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    pub frames: usize,
    pub height: usize,
    pub width: usize,
    pub channels: usize,
    pub pixels: Vec<f32>,
    pub mask: Vec<f32>,
}

impl ImageTensor {
    /// All-zero RGB image with an all-zero mask
    pub fn blank(width: usize, height: usize) -> Self {
        Self {
            frames: 1,
            height,
            width,
            channels: 3,
            pixels: vec![0.0; width * height * 3],
            mask: vec![0.0; width * height],
        }
    }

    pub fn sentinel() -> Self {
        Self::blank(SENTINEL_SIZE, SENTINEL_SIZE)
    }

    /// `[frames, height, width, channels]`
    pub fn shape(&self) -> [usize; 4] {
        [self.frames, self.height, self.width, self.channels]
    }

    fn frame_len(&self) -> usize {
        self.height * self.width * self.channels
    }

    fn push_rgba_frame(&mut self, frame: &RgbaImage) {
        for pixel in frame.pixels() {
            let [r, g, b, a] = pixel.0;
            self.pixels.push(r as f32 / 255.0);
            self.pixels.push(g as f32 / 255.0);
            self.pixels.push(b as f32 / 255.0);
            self.mask.push(1.0 - a as f32 / 255.0);
        }
        self.frames += 1;
    }
}

fn decode_err(e: impl std::fmt::Display) -> WatchError {
    WatchError::Decode(e.to_string())
}

/// Decode any format the `image` crate recognises. EXIF orientation is
/// applied; animated GIFs produce one frame per animation frame.
pub fn decode_image(bytes: &[u8]) -> Result<ImageTensor> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(decode_err)?;

    match reader.format() {
        Some(ImageFormat::Gif) => decode_gif(bytes),
        Some(_) => {
            let mut decoder = reader.into_decoder().map_err(decode_err)?;
            let orientation = decoder.orientation().map_err(decode_err)?;
            let mut img = DynamicImage::from_decoder(decoder).map_err(decode_err)?;
            img.apply_orientation(orientation);
            Ok(from_dynamic(&img))
        }
        None => Err(WatchError::Decode("unrecognised image format".to_string())),
    }
}

fn from_dynamic(img: &DynamicImage) -> ImageTensor {
    let width = img.width() as usize;
    let height = img.height() as usize;

    let pixels = img.to_rgb32f().into_raw();
    let mask = if img.color().has_alpha() {
        img.to_rgba32f()
            .pixels()
            .map(|p| 1.0 - p.0[3])
            .collect()
    } else {
        vec![0.0; width * height]
    };

    ImageTensor {
        frames: 1,
        height,
        width,
        channels: 3,
        pixels,
        mask,
    }
}

fn decode_gif(bytes: &[u8]) -> Result<ImageTensor> {
    let decoder = GifDecoder::new(Cursor::new(bytes)).map_err(decode_err)?;
    let frames = decoder.into_frames().collect_frames().map_err(decode_err)?;

    let first = frames
        .first()
        .ok_or_else(|| WatchError::Decode("gif has no frames".to_string()))?;
    let (width, height) = first.buffer().dimensions();

    let mut tensor = ImageTensor {
        frames: 0,
        height: height as usize,
        width: width as usize,
        channels: 3,
        pixels: Vec::with_capacity(frames.len() * (width * height * 3) as usize),
        mask: Vec::with_capacity(frames.len() * (width * height) as usize),
    };

    for frame in &frames {
        let buffer = frame.buffer();
        if buffer.dimensions() != (width, height) {
            return Err(WatchError::Decode(format!(
                "gif frames differ in size: {:?} vs {:?}",
                buffer.dimensions(),
                (width, height)
            )));
        }
        tensor.push_rgba_frame(buffer);
    }

    Ok(tensor)
}

/// Encode the first frame as PNG. Single-channel input is repeated to RGB,
/// extra channels are dropped.
pub fn encode_png(tensor: &ImageTensor) -> Result<Vec<u8>> {
    if tensor.frames == 0 || tensor.width == 0 || tensor.height == 0 {
        return Err(WatchError::Encode("image tensor is empty".to_string()));
    }
    if tensor.channels == 2 || tensor.channels == 0 {
        return Err(WatchError::Encode(format!(
            "unsupported channel count {}",
            tensor.channels
        )));
    }
    if tensor.pixels.len() < tensor.frame_len() {
        return Err(WatchError::Encode(format!(
            "expected at least {} values, got {}",
            tensor.frame_len(),
            tensor.pixels.len()
        )));
    }

    let to_u8 = |v: f32| (v * 255.0).clamp(0.0, 255.0) as u8;
    let mut raw = Vec::with_capacity(tensor.width * tensor.height * 3);
    for pixel in tensor.pixels[..tensor.frame_len()].chunks_exact(tensor.channels) {
        if tensor.channels == 1 {
            let v = to_u8(pixel[0]);
            raw.extend_from_slice(&[v, v, v]);
        } else {
            raw.extend(pixel[..3].iter().map(|&v| to_u8(v)));
        }
    }

    let img = RgbImage::from_raw(tensor.width as u32, tensor.height as u32, raw)
        .ok_or_else(|| WatchError::Encode("pixel buffer does not match dimensions".to_string()))?;

    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .map_err(|e| WatchError::Encode(e.to_string()))?;
    Ok(out.into_inner())
}

//! SDL2 preview window.
//! Renders the packed frames handed over by [`ChannelPreview`] on its own
//! thread; closing the window ends the preview but not the publisher.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use flume::{Receiver, RecvTimeoutError};
use sdl2::event::Event;
use sdl2::pixels::PixelFormatEnum;
use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use tracing::{error, info, trace};

use crate::display::{preview_channel, ChannelPreview, PreviewFrame};

/// How long to wait for a frame before servicing window events again
const EVENT_POLL: Duration = Duration::from_millis(50);

pub struct Sdl2Preview {
    canvas: Canvas<Window>,
    texture_creator: TextureCreator<WindowContext>,
    width: u32,
    height: u32,
}

impl Sdl2Preview {
    pub fn new(sdl_context: &sdl2::Sdl, width: u32, height: u32) -> Result<Self> {
        let video_subsystem = sdl_context.video().map_err(|e| eyre!(e))?;

        let window = video_subsystem
            .window("zedshm preview", width, height)
            .position_centered()
            .build()?;

        let canvas = window.into_canvas().present_vsync().build()?;
        let texture_creator = canvas.texture_creator();

        Ok(Self {
            canvas,
            texture_creator,
            width,
            height,
        })
    }

    pub fn render_frame(&mut self, frame: &PreviewFrame) -> Result<()> {
        // SDL's ARGB8888 is a native-endian word, i.e. B, G, R, A bytes here
        let mut texture = self
            .texture_creator
            .create_texture_streaming(PixelFormatEnum::ARGB8888, self.width, self.height)
            .map_err(|e| eyre!(e))?;

        texture
            .update(None, &frame.data, (self.width * 4) as usize)
            .map_err(|e| eyre!(e))?;

        self.canvas.clear();
        self.canvas
            .copy(&texture, None, None)
            .map_err(|e| eyre!(e))?;

        self.canvas.present();
        trace!("Previewed frame {}", frame.timestamp);
        Ok(())
    }

    pub fn run(&mut self, sdl_context: &sdl2::Sdl, rx: Receiver<PreviewFrame>) -> Result<()> {
        let mut event_pump = sdl_context.event_pump().map_err(|e| eyre!(e))?;

        'running: loop {
            for event in event_pump.poll_iter() {
                if let Event::Quit { .. } = event {
                    info!("Preview window closed");
                    break 'running;
                }
            }

            match rx.recv_timeout(EVENT_POLL) {
                Ok(frame) => self.render_frame(&frame)?,
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break 'running,
            }
        }

        Ok(())
    }
}

/// Opens a `width x height` preview window on a new thread and returns the
/// sink feeding it.
pub fn spawn_preview(width: u32, height: u32) -> (ChannelPreview, JoinHandle<()>) {
    let (sink, rx) = preview_channel();
    let handle = thread::spawn(move || {
        let run = || -> Result<()> {
            let sdl_context = sdl2::init().map_err(|e| eyre!(e))?;
            Sdl2Preview::new(&sdl_context, width, height)?.run(&sdl_context, rx)
        };
        if let Err(e) = run() {
            error!("Preview failed: {:?}", e);
        }
    });
    (sink, handle)
}

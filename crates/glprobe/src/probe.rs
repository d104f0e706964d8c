//! The probe run: shared contexts per device, buffer tracking, lock hand-off.

use anyhow::{anyhow, Result};
use glcontext::{gl, Context, ContextOptions, ContextRegistry, ContextRequest, DeviceKey, GlError, NativeDriver};
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use threading::{SharedContextFactory, SharedResourceRunner, Threading};
use tracing::{debug, info, warn};

/// What was learned about one device.
#[derive(Debug, Serialize)]
pub struct DeviceReport {
    pub device: String,
    pub version: Option<String>,
    pub family: Option<String>,
    pub hardware: bool,
    pub gl_extensions: usize,
    pub platform_extensions: usize,
    pub buffers: Option<BufferReport>,
    pub hand_off: Option<HandOffReport>,
}

/// Outcome of the buffer tracking exercise.
#[derive(Debug, Serialize)]
pub struct BufferReport {
    pub allocated: u64,
    pub tracked_size: u64,
    pub mapped: bool,
    pub unmapped: bool,
    pub tracked_after_delete: bool,
}

/// Outcome of the cross-thread make-current exercise.
#[derive(Debug, Default, Serialize)]
pub struct HandOffReport {
    pub threads: usize,
    pub acquired: usize,
    pub contended: usize,
}

pub struct Probe {
    pub registry: Arc<ContextRegistry>,
    pub driver: Arc<dyn NativeDriver>,
    pub request: ContextRequest,
    pub threading: Threading,
    pub threads: usize,
    pub rounds: usize,
}

impl Probe {
    pub fn run(&self, devices: &[DeviceKey]) -> Result<Vec<DeviceReport>> {
        let runner = SharedResourceRunner::new(
            "glprobe-shared",
            SharedContextFactory::new(self.registry.clone(), self.driver.clone(), self.request),
        );

        let mut reports = Vec::with_capacity(devices.len());
        for device in devices {
            let Some(shared) = runner.get_or_create_shared(device)? else {
                warn!(%device, "no shared context could be created");
                reports.push(DeviceReport {
                    device: device.to_string(),
                    version: None,
                    family: None,
                    hardware: false,
                    gl_extensions: 0,
                    platform_extensions: 0,
                    buffers: None,
                    hand_off: None,
                });
                continue;
            };
            info!(%device, version = %shared.version, "shared context available");

            let client = Context::new(self.registry.clone(), self.driver.clone(), device.clone(), self.request);
            client.share_with(&shared.context)?;

            let on_gl_thread = client.clone();
            let buffers = self.threading.invoke_on_gl_thread(move || exercise_buffers(&on_gl_thread))??;
            let hand_off = self.hand_off(&client)?;

            reports.push(DeviceReport {
                device: device.to_string(),
                version: Some(shared.version.to_string()),
                family: client.family_key().map(|family| family.to_string()),
                hardware: shared.options.contains(ContextOptions::HARDWARE),
                gl_extensions: shared.gl_extension_count,
                platform_extensions: shared.platform_extension_count,
                buffers: Some(buffers),
                hand_off: Some(hand_off),
            });

            let on_gl_thread = client.clone();
            self.threading.invoke_on_gl_thread(move || on_gl_thread.destroy())??;
        }

        runner.release_and_wait()?;
        self.registry.shutdown();
        Ok(reports)
    }

    /// Make `context` current from several threads at once.
    fn hand_off(&self, context: &Context) -> Result<HandOffReport> {
        let results: Vec<Result<(usize, usize), GlError>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..self.threads)
                .map(|index| {
                    thread::Builder::new()
                        .name(format!("glprobe-{index}"))
                        .spawn_scoped(scope, move || -> Result<(usize, usize), GlError> {
                            let mut acquired = 0;
                            let mut contended = 0;
                            for _ in 0..self.rounds {
                                match context.make_current() {
                                    Ok(outcome) if outcome.is_current() => {
                                        acquired += 1;
                                        context.release()?;
                                    }
                                    Ok(_) => {}
                                    Err(GlError::LockContention { .. }) => contended += 1,
                                    Err(err) => return Err(err),
                                }
                            }
                            Ok((acquired, contended))
                        })
                })
                .collect::<std::io::Result<_>>()
                .unwrap_or_default();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or_else(|_| Err(GlError::illegal_state("probe thread panicked"))))
                .collect()
        });
        if results.len() != self.threads {
            return Err(anyhow!("could not spawn {} probe threads", self.threads));
        }

        let mut report = HandOffReport {
            threads: self.threads,
            ..HandOffReport::default()
        };
        for result in results {
            let (acquired, contended) = result?;
            report.acquired += acquired;
            report.contended += contended;
        }
        debug!(?report, "lock hand-off finished");
        Ok(report)
    }
}

fn exercise_buffers(context: &Context) -> Result<BufferReport, GlError> {
    const NAME: u32 = 1;
    const SIZE: i64 = 4096;

    context.make_current()?;
    context.bind_buffer(gl::ARRAY_BUFFER, NAME)?;
    let storage = context.buffer_data(gl::ARRAY_BUFFER, SIZE, None, gl::DYNAMIC_DRAW)?;
    let tracked_size = context.bound_buffer_size(gl::ARRAY_BUFFER)?;
    let mapped = context.map_buffer(gl::ARRAY_BUFFER, gl::WRITE_ONLY)?.is_mapped();
    let unmapped = mapped && context.unmap_buffer(gl::ARRAY_BUFFER)?;
    context.delete_buffers(&[NAME])?;
    let tracked_after_delete = context.buffer_storage_of(NAME).is_some();
    context.release()?;

    Ok(BufferReport {
        allocated: storage.size(),
        tracked_size,
        mapped,
        unmapped,
        tracked_after_delete,
    })
}

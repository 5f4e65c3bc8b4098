//! PNG rendering of capture windows with plotters

use crate::common::clock_label;
use crate::error::{AccelError, Result};
use crate::export::{CaptureWindow, ChannelSeries, Renderer};
use plotters::coord::Shift;
use plotters::prelude::*;
use std::error::Error;
use std::ops::Range;
use std::path::Path;

const IMAGE_WIDTH: u32 = 1600;
const SUBPLOT_HEIGHT: u32 = 450;
const OVERLAY_HEIGHT: u32 = 900;

type DrawResult = std::result::Result<(), Box<dyn Error>>;

struct Line<'a> {
    label: String,
    timestamps: &'a [f64],
    values: &'a [f64],
    color: RGBColor,
}

/// Renders snapshot images to PNG files
#[derive(Debug, Clone, Copy, Default)]
pub struct PlottersRenderer;

impl PlottersRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl Renderer for PlottersRenderer {
    fn render_subplots(&self, window: &CaptureWindow, y_bound: f64, path: &Path) -> Result<()> {
        draw_subplots(window, y_bound, path)
            .map_err(|e| AccelError::Render(format!("{}: {}", path.display(), e)))
    }

    fn render_overlay(&self, window: &CaptureWindow, y_bound: f64, path: &Path) -> Result<()> {
        draw_overlay(window, y_bound, path)
            .map_err(|e| AccelError::Render(format!("{}: {}", path.display(), e)))
    }
}

fn draw_subplots(window: &CaptureWindow, y_bound: f64, path: &Path) -> DrawResult {
    let rows = window.channels.len().max(1);
    let root = BitMapBackend::new(path, (IMAGE_WIDTH, SUBPLOT_HEIGHT * rows as u32))
        .into_drawing_area();
    root.fill(&WHITE)?;

    let x_range = time_range(window);
    let areas = root.split_evenly((rows, 1));

    if window.channels.is_empty() {
        let caption = format!("No samples in the last {}s", window.duration_label());
        draw_chart(&areas[0], &caption, x_range.clone(), y_bound, &[])?;
    }

    for ((&channel, series), area) in window.channels.iter().zip(areas.iter()) {
        let caption = format!(
            "Sensor {} acceleration, last {}s",
            channel,
            window.duration_label()
        );
        let lines = axis_lines(channel, series, false);
        draw_chart(area, &caption, x_range.clone(), y_bound, &lines)?;
    }

    root.present()?;
    Ok(())
}

fn draw_overlay(window: &CaptureWindow, y_bound: f64, path: &Path) -> DrawResult {
    let root = BitMapBackend::new(path, (IMAGE_WIDTH, OVERLAY_HEIGHT)).into_drawing_area();
    root.fill(&WHITE)?;

    let lines: Vec<Line<'_>> = window
        .channels
        .iter()
        .flat_map(|(&channel, series)| axis_lines(channel, series, true))
        .collect();
    let caption = format!("Acceleration overlay, last {}s", window.duration_label());
    draw_chart(&root, &caption, time_range(window), y_bound, &lines)?;

    root.present()?;
    Ok(())
}

fn draw_chart(
    area: &DrawingArea<BitMapBackend<'_>, Shift>,
    caption: &str,
    x_range: Range<f64>,
    y_bound: f64,
    lines: &[Line<'_>],
) -> DrawResult {
    let mut chart = ChartBuilder::on(area)
        .caption(caption, ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_range, -y_bound..y_bound)?;

    chart
        .configure_mesh()
        .x_labels(8)
        .y_labels(9)
        .x_label_formatter(&|t: &f64| clock_label(*t))
        .x_desc("Time")
        .y_desc("Acceleration (g)")
        .draw()?;

    for line in lines {
        let color = line.color;
        chart
            .draw_series(LineSeries::new(
                line.timestamps.iter().copied().zip(line.values.iter().copied()),
                &color,
            ))?
            .label(line.label.clone())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &color));
    }

    if !lines.is_empty() {
        chart
            .configure_series_labels()
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()?;
    }
    Ok(())
}

fn axis_colors(channel: u8) -> [RGBColor; 3] {
    if channel % 2 == 0 {
        [RED, GREEN, BLUE]
    } else {
        [RGBColor(255, 140, 0), RGBColor(0, 150, 150), MAGENTA]
    }
}

fn axis_lines(channel: u8, series: &ChannelSeries, with_sensor: bool) -> Vec<Line<'_>> {
    [("X", &series.x_g), ("Y", &series.y_g), ("Z", &series.z_g)]
        .into_iter()
        .zip(axis_colors(channel))
        .map(|((axis, values), color)| Line {
            label: if with_sensor {
                format!("Sensor {} {}", channel, axis)
            } else {
                axis.to_string()
            },
            timestamps: &series.timestamps,
            values,
            color,
        })
        .collect()
}

/// Extent of the data, padded when it has no width
fn time_range(window: &CaptureWindow) -> Range<f64> {
    let first = window
        .channels
        .values()
        .filter_map(|s| s.timestamps.first().copied())
        .fold(f64::INFINITY, f64::min);
    let last = window
        .channels
        .values()
        .filter_map(|s| s.timestamps.last().copied())
        .fold(f64::NEG_INFINITY, f64::max);

    if !first.is_finite() {
        window.since..window.until
    } else if last > first {
        first..last
    } else {
        first - 1.0..first + 1.0
    }
}

use serde::Serialize;
use serde_json::{Value, json};

use crate::forecast::aggregate::{GlobalSeries, StackedSeries};
use crate::forecast::map::MapFrame;
use crate::pipeline::CountryView;

pub const PALETTE: [&str; 8] = [
    "#FFD053", "#7BCDF3", "#63BCAF", "#4C9A8E", "#FF9736", "#E4E4E4", "#086788", "#14120E",
];

/// Blue -> teal -> yellow -> orange
const MAP_COLORSCALE: [(f64, &str); 4] = [
    (0.0, "#4675c1"),
    (0.33, "#58b0a9"),
    (0.66, "#ffd480"),
    (1.0, "#faa056"),
];

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Plotly traces and layout, ready to hand to the browser
#[derive(Debug, Clone, Serialize)]
pub struct PlotPayload {
    pub data: Value,
    pub layout: Value,
}

fn power_axes_layout(title: Option<&str>) -> Value {
    let mut layout = json!({
        "xaxis": { "title": "Time (UTC)" },
        "yaxis": { "title": "Power [GW]", "rangemode": "tozero" },
        "plot_bgcolor": "rgb(250, 250, 250)",
        "paper_bgcolor": "white",
    });
    if let Some(title) = title {
        layout["title"] = json!({ "text": title });
    }
    layout
}

pub fn global_chart(series: &GlobalSeries) -> PlotPayload {
    let timestamps: Vec<String> = series
        .points
        .iter()
        .map(|p| p.timestamp.format(TIME_FORMAT).to_string())
        .collect();
    let power: Vec<f64> = series.points.iter().map(|p| p.power_gw).collect();

    PlotPayload {
        data: json!([{
            "x": timestamps,
            "y": power,
            "type": "scatter",
            "mode": "lines",
            "marker": { "color": PALETTE[0] },
        }]),
        layout: power_axes_layout(Some("Global Solar Power Forecast")),
    }
}

/// Stacked area chart; all-zero columns are left out to keep the hover readable
pub fn stacked_chart(series: &StackedSeries) -> PlotPayload {
    let timestamps: Vec<String> = series
        .timestamps
        .iter()
        .map(|ts| ts.format(TIME_FORMAT).to_string())
        .collect();

    let traces: Vec<Value> = series
        .visible_columns()
        .enumerate()
        .map(|(i, column)| {
            json!({
                "x": timestamps,
                "y": column.values,
                "name": column.label,
                "type": "scatter",
                "mode": "lines",
                "stackgroup": "one",
                "line": { "width": 0.5, "color": PALETTE[i % PALETTE.len()] },
                "hovertemplate": format!("{}: %{{y:.3f}} GW<br>%{{x}}<extra></extra>", column.label),
            })
        })
        .collect();

    let mut layout = power_axes_layout(None);
    layout["hovermode"] = json!("x unified");
    layout["legend"] = json!({
        "orientation": "h",
        "yanchor": "bottom",
        "y": 1.02,
        "xanchor": "right",
        "x": 1,
    });

    PlotPayload {
        data: Value::Array(traces),
        layout,
    }
}

pub fn map_chart(frame: &MapFrame) -> PlotPayload {
    let locations: Vec<usize> = frame.rows.iter().map(|r| r.index).collect();
    let names: Vec<&str> = frame.rows.iter().map(|r| r.name.as_str()).collect();
    let colorscale: Vec<Value> = MAP_COLORSCALE
        .iter()
        .map(|(stop, color)| json!([stop, color]))
        .collect();

    PlotPayload {
        data: json!([{
            "type": "choroplethmap",
            "geojson": frame.to_feature_collection(),
            "locations": locations,
            "featureidkey": "id",
            "z": frame.values(),
            "colorscale": colorscale,
            "colorbar": { "title": { "text": frame.colorbar_title() } },
            "marker": { "opacity": 0.5 },
            "customdata": names,
            "hovertemplate": format!(
                "<b>%{{customdata}}</b><br>Power: %{{z:.2f}} {}<extra></extra>",
                frame.unit()
            ),
        }]),
        layout: json!({
            "map": { "style": "carto-positron" },
            "margin": { "r": 0, "t": 0, "l": 0, "b": 0 },
        }),
    }
}

pub fn country_chart(view: &CountryView) -> PlotPayload {
    let timestamps: Vec<String> = view
        .series
        .iter()
        .map(|p| p.timestamp.format(TIME_FORMAT).to_string())
        .collect();
    let power: Vec<f64> = view.series.iter().map(|p| p.power_gw).collect();

    PlotPayload {
        data: json!([{
            "x": timestamps,
            "y": power,
            "name": view.name,
            "type": "scatter",
            "mode": "lines",
            "marker": { "color": PALETTE[0] },
        }]),
        layout: power_axes_layout(Some(&format!("{} Solar Forecast", view.name))),
    }
}

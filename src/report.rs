/// A minimal `<table class="dataframe">` writer for the ranked reports.
#[derive(Debug, Clone, Default)]
pub struct HtmlTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl HtmlTable {
    pub fn new<I, S>(headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row<I, S>(&mut self, cells: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rows.push(cells.into_iter().map(Into::into).collect());
    }

    pub fn render(&self) -> String {
        let mut out = String::from("<table border=\"1\" class=\"dataframe\">\n  <thead>\n    <tr style=\"text-align: right;\">\n");
        for h in &self.headers {
            out.push_str(&format!("      <th>{}</th>\n", escape(h)));
        }
        out.push_str("    </tr>\n  </thead>\n  <tbody>\n");
        for row in &self.rows {
            out.push_str("    <tr>\n");
            for cell in row {
                out.push_str(&format!("      <td>{}</td>\n", escape(cell)));
            }
            out.push_str("    </tr>\n");
        }
        out.push_str("  </tbody>\n</table>");
        out
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

use serde::Deserialize;

/// Sheet labels the pipeline gives meaning to. Everything else is carried
/// through as an opaque cell.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Columns {
    pub inflow_month: String,
    pub company_id: String,
    pub company: String,
    pub phone: String,
    pub manager: String,
    pub email: String,
    pub memo: String,
    pub action: String,
    pub end_date: String,
}

impl Default for Columns {
    fn default() -> Self {
        Self {
            inflow_month: "유입월".to_string(),
            company_id: "회사 ID".to_string(),
            company: "회사명".to_string(),
            phone: "연락처".to_string(),
            manager: "담당자".to_string(),
            email: "이메일".to_string(),
            memo: "상담내용".to_string(),
            action: "후속조치".to_string(),
            end_date: "종료일".to_string(),
        }
    }
}

impl Columns {
    /// Labels whose presence marks a row as an actual customer record.
    pub fn identity(&self) -> [&str; 3] {
        [&self.company, &self.manager, &self.email]
    }
}

/// Labels joined into the free-text search haystack.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub fields: Vec<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        let columns = Columns::default();
        Self {
            fields: vec![
                columns.company,
                columns.manager,
                columns.email,
                columns.memo,
                columns.action,
                columns.phone,
                columns.company_id,
                columns.inflow_month,
            ],
        }
    }
}

use std::fmt::Display;

#[derive(Debug)]
pub enum TaeniteError {
    Input(String),
    Mesher(String),
    Solver(String),
    PostProcessor(String),
}

impl Display for TaeniteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (err_name, value) = match self {
            TaeniteError::Input(v) => ("Input", v),
            TaeniteError::Mesher(v) => ("Mesher", v),
            TaeniteError::Solver(v) => ("Solver", v),
            TaeniteError::PostProcessor(v) => ("Post Processor", v),
        };

        write!(f, "{} error: {}", err_name, value)
    }
}

impl std::error::Error for TaeniteError {}

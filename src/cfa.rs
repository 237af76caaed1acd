use serde::{Serialize, Deserialize};
use crate::ast::{CType, Expression, Location, Member};


#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CfaNode {
    pub id:         usize,
    pub function:   String,
}

impl CfaNode {
    pub fn new(id: usize, function: &str) -> Self {
        CfaNode {
            id,
            function: function.to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Param {
    pub name:   String,
    #[serde(rename = "type")]
    pub typ:    CType,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name:   String,
    #[serde(default)]
    pub params: Vec<Param>,
    pub ret:    CType,
    #[serde(default)]
    pub vararg: bool,
}

/// `lhs = function(args)`, or just `function(args)`
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub lhs:        Option<Expression>,
    pub function:   String,
    #[serde(default)]
    pub args:       Vec<Expression>,
    pub ret:        CType,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Initializer {
    Expression {
        value:  Expression,
    },
    List {
        items:  Vec<Initializer>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Declaration {
    Variable {
        name:       String,
        #[serde(default)]
        global:     bool,
        #[serde(rename = "type")]
        typ:        CType,
        #[serde(default)]
        init:       Option<Initializer>,
    },
    Function {
        name:       String,
        #[serde(rename = "type")]
        typ:        CType,
    },
    Composite {
        name:       String,
        #[serde(default)]
        union:      bool,
        members:    Vec<Member>,
    },
    Typedef {
        name:       String,
        #[serde(rename = "type")]
        typ:        CType,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Statement {
    Assignment {
        lhs:    Expression,
        rhs:    Expression,
    },
    /// a call to a function without a body in the control flow graph
    Call {
        call:   FunctionCall,
    },
    Expression {
        value:  Expression,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EdgeKind {
    Blank {
        #[serde(default)]
        description: String,
    },
    Declaration {
        declaration: Declaration,
    },
    Statement {
        statement:  Statement,
    },
    Assume {
        expression: Expression,
        truth:      bool,
    },
    /// entering `callee`. parameters are bound on this edge
    FunctionCall {
        call:       FunctionCall,
        callee:     FunctionDef,
    },
    /// `return e;` inside the callee
    Return {
        #[serde(default)]
        expression: Option<Expression>,
        ret:        CType,
    },
    /// back in the caller. `call` is the statement at the call site
    FunctionReturn {
        call:       FunctionCall,
        callee:     String,
    },
    Multi {
        edges:      Vec<CfaEdge>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CfaEdge {
    pub pred:   CfaNode,
    pub succ:   CfaNode,
    #[serde(default)]
    pub loc:    Location,
    #[serde(flatten)]
    pub kind:   EdgeKind,
}

impl CfaEdge {
    pub fn new(pred: CfaNode, succ: CfaNode, kind: EdgeKind) -> Self {
        CfaEdge {
            pred,
            succ,
            loc: Location::default(),
            kind,
        }
    }

    pub fn at(mut self, loc: Location) -> Self {
        self.loc = loc;
        self
    }

    pub fn is_blank(&self) -> bool {
        match self.kind {
            EdgeKind::Blank{..} => true,
            _ => false,
        }
    }

    /// truth value of an assume edge
    pub fn assumption(&self) -> Option<bool> {
        match self.kind {
            EdgeKind::Assume{truth, ..} => Some(truth),
            _ => None,
        }
    }

    /// the function identifiers on this edge are scoped to
    pub fn function(&self) -> &str {
        match self.kind {
            EdgeKind::FunctionReturn{..} => &self.succ.function,
            _ => &self.pred.function,
        }
    }
}

impl std::fmt::Display for CfaEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "N{} -> N{}: ", self.pred.id, self.succ.id)?;
        match &self.kind {
            EdgeKind::Blank{description} => write!(f, "{}", description),
            EdgeKind::Declaration{declaration} => match declaration {
                Declaration::Variable{name, typ, ..}    => write!(f, "{} {};", typ, name),
                Declaration::Function{name, typ}        => write!(f, "{} {};", typ, name),
                Declaration::Composite{name, union, ..} => write!(f, "{} {} {{...}};", if *union {"union"} else {"struct"}, name),
                Declaration::Typedef{name, typ}         => write!(f, "typedef {} {};", typ, name),
            },
            EdgeKind::Statement{statement} => match statement {
                Statement::Assignment{lhs, rhs}     => write!(f, "{} = {};", lhs, rhs),
                Statement::Call{call}               => write!(f, "{};", display_call(call)),
                Statement::Expression{value}        => write!(f, "{};", value),
            },
            EdgeKind::Assume{expression, truth} => {
                if *truth {
                    write!(f, "[{}]", expression)
                } else {
                    write!(f, "[!({})]", expression)
                }
            }
            EdgeKind::FunctionCall{call, ..}    => write!(f, "{}", display_call(call)),
            EdgeKind::Return{expression: Some(e), ..} => write!(f, "return {};", e),
            EdgeKind::Return{expression: None, ..} => write!(f, "return;"),
            EdgeKind::FunctionReturn{callee, ..} => write!(f, "return from {}", callee),
            EdgeKind::Multi{edges} => write!(f, "{} edges", edges.len()),
        }
    }
}

fn display_call(call: &FunctionCall) -> String {
    let args : Vec<String> = call.args.iter().map(|a|a.to_string()).collect();
    match &call.lhs {
        Some(lhs) => format!("{} = {}({})", lhs, call.function, args.join(", ")),
        None => format!("{}({})", call.function, args.join(", ")),
    }
}


/// A path as written on disk: composite definitions followed by edges.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PathFile {
    #[serde(default)]
    pub composites: Vec<Declaration>,
    pub edges:      Vec<CfaEdge>,
}

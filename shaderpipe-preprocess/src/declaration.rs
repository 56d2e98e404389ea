use nom::branch::alt;
use nom::bytes::complete::{is_not, tag, take_till1, take_until};
use nom::character::complete::{char, multispace0, multispace1};
use nom::combinator::{opt, recognize, value};
use nom::sequence::{delimited, terminated, tuple};
use nom::IResult;
use std::fmt;
use std::fmt::Write;

/// IO kind of a parsed declaration.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum IoKind {
    In,
    Out,
    Uniform,
    Const,
}

impl IoKind {
    pub fn keyword(self) -> &'static str {
        match self {
            IoKind::In => "in",
            IoKind::Out => "out",
            IoKind::Uniform => "uniform",
            IoKind::Const => "const",
        }
    }
}

/// Array suffix of a declared name: `[3]`, `[N]` or the unsized `[]`.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ArraySize {
    Unsized,
    Expr(String),
}

/// A parsed `in`/`out`/`uniform`/`const` declaration line.
///
/// Created when a declaration is recognized in the stage source;
/// consumed when emitting a (possibly renamed) declaration and when
/// deciding whether cross-stage pass-through code is needed.
#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub layout: Option<String>,
    pub interpolation: Option<String>,
    pub kind: IoKind,
    pub ty: String,
    pub name: String,
    pub array_size: Option<ArraySize>,
    pub initializer: Option<String>,
}

impl Declaration {
    /// The declaration as a single GLSL source line.
    pub fn text(&self) -> String {
        let mut s = String::new();
        if let Some(layout) = &self.layout {
            s.push_str(layout);
            s.push(' ');
        }
        if let Some(interpolation) = &self.interpolation {
            s.push_str(interpolation);
            s.push(' ');
        }
        s.push_str(self.kind.keyword());
        s.push(' ');
        s.push_str(&self.ty);
        s.push(' ');
        s.push_str(&self.name);
        match &self.array_size {
            Some(ArraySize::Unsized) => s.push_str("[]"),
            Some(ArraySize::Expr(expr)) => {
                let _ = write!(s, "[{expr}]");
            }
            None => {}
        }
        if let Some(init) = &self.initializer {
            s.push_str(" = ");
            s.push_str(init);
        }
        s.push(';');
        s
    }
}

impl fmt::Display for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

fn layout_qualifier(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        tag("layout"),
        multispace0,
        delimited(char('('), is_not(")"), char(')')),
    )))(input)
}

fn interpolation_qualifier(input: &str) -> IResult<&str, &str> {
    alt((
        tag("flat"),
        tag("noperspective"),
        tag("smooth"),
        tag("centroid"),
    ))(input)
}

fn io_kind(input: &str) -> IResult<&str, IoKind> {
    alt((
        value(IoKind::Uniform, tag("uniform")),
        value(IoKind::Const, tag("const")),
        value(IoKind::Out, tag("out")),
        value(IoKind::In, tag("in")),
    ))(input)
}

fn declaration(input: &str) -> IResult<&str, Declaration> {
    let (input, _) = multispace0(input)?;
    let (input, layout) = opt(terminated(layout_qualifier, multispace1))(input)?;
    let (input, interpolation) = opt(terminated(interpolation_qualifier, multispace1))(input)?;
    let (input, kind) = terminated(io_kind, multispace1)(input)?;
    let (input, ty) = take_till1(char::is_whitespace)(input)?;
    let (input, _) = multispace1(input)?;
    let (input, body) = take_until(";")(input)?;
    let (input, _) = char(';')(input)?;

    let (name_part, initializer) = match body.split_once('=') {
        Some((name, init)) => (name.trim(), Some(init.trim().to_string())),
        None => (body.trim(), None),
    };
    let (ty, ty_array) = split_array(ty);
    let (name, name_array) = split_array(name_part);

    Ok((
        input,
        Declaration {
            layout: layout.map(str::to_string),
            interpolation: interpolation.map(str::to_string),
            kind,
            ty,
            name,
            array_size: name_array.or(ty_array),
            initializer,
        },
    ))
}

/// Splits an embedded array suffix out of a type or name token.
fn split_array(token: &str) -> (String, Option<ArraySize>) {
    let Some(open) = token.find('[') else {
        return (token.to_string(), None);
    };
    let Some(close) = token.rfind(']') else {
        return (token.to_string(), None);
    };
    let expr = token[open + 1..close].trim();
    let size = if expr.is_empty() {
        ArraySize::Unsized
    } else {
        ArraySize::Expr(expr.to_string())
    };
    (token[..open].trim().to_string(), Some(size))
}

/// Parses a declaration line, or `None` if the line is anything else.
/// The whole line must be consumed apart from trailing whitespace.
pub fn parse_declaration(line: &str) -> Option<Declaration> {
    let (rest, decl) = declaration(line).ok()?;
    if !rest.trim().is_empty() {
        return None;
    }
    if decl.name.is_empty() || decl.ty.is_empty() {
        return None;
    }
    Some(decl)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_plain_input() {
        let decl = parse_declaration("in vec3 in_pos;").unwrap();
        assert_eq!(decl.kind, IoKind::In);
        assert_eq!(decl.ty, "vec3");
        assert_eq!(decl.name, "in_pos");
        assert_eq!(decl.array_size, None);
        assert_eq!(decl.initializer, None);
    }

    #[test]
    fn parses_interpolation_qualifier() {
        let decl = parse_declaration("  flat in int in_id;").unwrap();
        assert_eq!(decl.interpolation.as_deref(), Some("flat"));
        assert_eq!(decl.kind, IoKind::In);
        assert_eq!(decl.name, "in_id");
    }

    #[test]
    fn parses_layout_qualifier() {
        let decl = parse_declaration("layout(location = 2) in vec2 in_uv;").unwrap();
        assert_eq!(decl.layout.as_deref(), Some("layout(location = 2)"));
        assert_eq!(decl.name, "in_uv");
    }

    #[test]
    fn parses_array_on_name_and_type() {
        let decl = parse_declaration("in vec3 in_pos[ ];").unwrap();
        assert_eq!(decl.array_size, Some(ArraySize::Unsized));

        let decl = parse_declaration("in vec3[4] in_pos;").unwrap();
        assert_eq!(decl.array_size, Some(ArraySize::Expr("4".to_string())));
        assert_eq!(decl.ty, "vec3");

        let decl = parse_declaration("out vec4 out_color[NUM_TARGETS];").unwrap();
        assert_eq!(
            decl.array_size,
            Some(ArraySize::Expr("NUM_TARGETS".to_string()))
        );
    }

    #[test]
    fn parses_initializer_with_spaces() {
        let decl = parse_declaration("const vec3 c_up = vec3(0.0, 1.0, 0.0);").unwrap();
        assert_eq!(decl.kind, IoKind::Const);
        assert_eq!(decl.initializer.as_deref(), Some("vec3(0.0, 1.0, 0.0)"));
        assert_eq!(decl.text(), "const vec3 c_up = vec3(0.0, 1.0, 0.0);");
    }

    #[test]
    fn rejects_non_declarations() {
        assert!(parse_declaration("void main() {").is_none());
        assert!(parse_declaration("    gl_Position = vec4(0.0);").is_none());
        assert!(parse_declaration("int counter = 0;").is_none());
        assert!(parse_declaration("#define FOO 1").is_none());
        // missing terminating semicolon
        assert!(parse_declaration("in vec3 in_pos").is_none());
    }

    #[test]
    fn round_trips_through_text() {
        let decl = parse_declaration("flat in int in_id;").unwrap();
        assert_eq!(decl.text(), "flat in int in_id;");
    }
}
